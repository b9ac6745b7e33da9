use alloy_primitives::U256;

pub const WEI_PER_GWEI: u64 = 1_000_000_000;
pub const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// Task fees are stored in gwei and paid in wei.
pub fn gwei_to_wei(gwei: u64) -> U256 {
    U256::from(gwei) * U256::from(WEI_PER_GWEI)
}

/// Approximate ether value of a wei balance, for logs only.
pub fn wei_to_ether(wei: U256) -> f64 {
    let whole: u128 = (wei / U256::from(WEI_PER_ETHER)).saturating_to();
    let frac: u128 = (wei % U256::from(WEI_PER_ETHER)).saturating_to();
    whole as f64 + frac as f64 / WEI_PER_ETHER as f64
}
