//! Arbitrage Detection Module
//! Mission: Identify and quantify cross-platform price mismatches
//! Philosophy: Profit is in the spread, execution is in the speed

pub mod sizer;
