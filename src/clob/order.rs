use alloy_primitives::{address, Address, U256};
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{eip712_domain, sol, SolStruct};
use anyhow::{anyhow, Result};
use rand::Rng;
use serde::Serialize;

use crate::{
    clob::auth::sign_digest,
    normalizer::{OrderType, Side},
    utils::{decimal_places, round_down},
};

sol! {
    struct Order {
        uint256 salt;
        address maker;
        address signer;
        address taker;
        uint256 tokenId;
        uint256 makerAmount;
        uint256 takerAmount;
        uint256 expiration;
        uint256 nonce;
        uint256 feeRateBps;
        uint8 side;
        uint8 signatureType;
    }
}

const TOKEN_DECIMALS: f64 = 1_000_000.0;
const SIZE_DECIMALS: u32 = 2;

/// Exchange contract that verifies orders for `chain_id`.
pub fn exchange_address(chain_id: u64, neg_risk: bool) -> Option<Address> {
    match (chain_id, neg_risk) {
        (137, false) => Some(address!("4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E")),
        (137, true) => Some(address!("C5d563A36AE78145C45a50134d48A1215220f80a")),
        (80002, false) => Some(address!("dFE02Eb6733538f8Ea35D585af8DE5958AD99E40")),
        (80002, true) => Some(address!("d91E80cF2E7be2e162c6513ceD06f1dD0dA35296")),
        _ => None,
    }
}

/// How the exchange signs on behalf of the funder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    Eoa = 0,
    PolyProxy = 1,
    GnosisSafe = 2,
}

impl SignatureType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SignatureType::Eoa),
            1 => Some(SignatureType::PolyProxy),
            2 => Some(SignatureType::GnosisSafe),
            _ => None,
        }
    }
}

/// Base units (6 decimals) on each side of a market order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderAmounts {
    pub maker: u128,
    pub taker: u128,
}

fn to_base_units(x: f64) -> Result<u128> {
    let scaled = (x * TOKEN_DECIMALS).round();
    if !scaled.is_finite() || scaled < 0.0 {
        return Err(anyhow!("amount out of range: {x}"));
    }
    Ok(scaled as u128)
}

/// Buy `amount` is USDC spent; sell `amount` is shares sold. The maker side
/// keeps cent precision; the taker side keeps the tick's decimals plus two.
pub fn market_order_amounts(side: Side, amount: f64, price: f64, tick: f64) -> Result<OrderAmounts> {
    if !(price > 0.0 && price < 1.0) {
        return Err(anyhow!("price {price} outside (0, 1)"));
    }
    let amount_decimals = decimal_places(tick) + 2;
    let maker = round_down(amount, SIZE_DECIMALS);
    if maker <= 0.0 {
        return Err(anyhow!("amount {amount} rounds to zero"));
    }
    let taker = match side {
        Side::Buy => maker / price,
        Side::Sell => maker * price,
    };
    let taker = round_down(taker, amount_decimals);
    Ok(OrderAmounts {
        maker: to_base_units(maker)?,
        taker: to_base_units(taker)?,
    })
}

/// Inputs for one signed market order.
#[derive(Debug, Clone)]
pub struct MarketOrderArgs<'a> {
    pub token_id: &'a str,
    pub side: Side,
    pub amount: f64,
    pub price: f64,
    pub tick: f64,
    pub fee_rate_bps: u64,
    pub neg_risk: bool,
}

/// Wire form of the signed order inside `POST /order`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: u64,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub side: &'static str,
    pub signature_type: u8,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderBody<'a> {
    pub order: &'a SignedOrder,
    pub owner: &'a str,
    pub order_type: &'static str,
}

impl SignedOrder {
    pub fn post_body<'a>(&'a self, owner: &'a str, order_type: OrderType) -> PostOrderBody<'a> {
        PostOrderBody {
            order: self,
            owner,
            order_type: order_type.as_str(),
        }
    }
}

fn generate_salt() -> u64 {
    // Kept below 2^53 so the JSON number survives a round-trip through f64.
    rand::rng().random_range(0..(1u64 << 53))
}

pub struct OrderSigner<'a> {
    pub signer: &'a PrivateKeySigner,
    pub funder: Address,
    pub signature_type: SignatureType,
    pub chain_id: u64,
}

impl OrderSigner<'_> {
    pub fn sign_market_order(&self, args: &MarketOrderArgs<'_>) -> Result<SignedOrder> {
        let token_id: U256 = args
            .token_id
            .parse()
            .map_err(|e| anyhow!("tokenId {} is not a uint256: {e}", args.token_id))?;
        let amounts = market_order_amounts(args.side, args.amount, args.price, args.tick)?;
        let exchange = exchange_address(self.chain_id, args.neg_risk)
            .ok_or_else(|| anyhow!("no exchange contract for chain {}", self.chain_id))?;

        let salt = generate_salt();
        let side_code: u8 = match args.side {
            Side::Buy => 0,
            Side::Sell => 1,
        };
        let signer_address = self.signer.address();

        let order = Order {
            salt: U256::from(salt),
            maker: self.funder,
            signer: signer_address,
            taker: Address::ZERO,
            tokenId: token_id,
            makerAmount: U256::from(amounts.maker),
            takerAmount: U256::from(amounts.taker),
            expiration: U256::ZERO,
            nonce: U256::ZERO,
            feeRateBps: U256::from(args.fee_rate_bps),
            side: side_code,
            signatureType: self.signature_type as u8,
        };

        let domain = eip712_domain! {
            name: "Polymarket CTF Exchange",
            version: "1",
            chain_id: self.chain_id,
            verifying_contract: exchange,
        };
        let digest = order.eip712_signing_hash(&domain);
        let signature = sign_digest(self.signer, &digest)?;

        Ok(SignedOrder {
            salt,
            maker: self.funder.to_string(),
            signer: signer_address.to_string(),
            taker: Address::ZERO.to_string(),
            token_id: token_id.to_string(),
            maker_amount: amounts.maker.to_string(),
            taker_amount: amounts.taker.to_string(),
            expiration: "0".to_string(),
            nonce: "0".to_string(),
            fee_rate_bps: args.fee_rate_bps.to_string(),
            side: args.side.as_str(),
            signature_type: self.signature_type as u8,
            signature,
        })
    }
}
