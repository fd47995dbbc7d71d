//! # Initialisation Parameters

/// Clock and timeout configuration handed to [`CoreMmc::init`]
///
/// [`CoreMmc::init`]: crate::CoreMmc::init
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Params {
    /// Clock divider once the device runs at high speed
    pub clk_rate_div: u8,
    /// Clock divider during identification (must give 400 kHz or less)
    pub init_clk_rate_div: u8,
    /// Data timeout, in MMC clock cycles
    pub data_timeout: u32,
    /// Ticks to wait after the identification clock starts
    pub power_up_ticks: u32,
}

impl Params {
    /// HCLK / 2
    pub const HCLK_DIV_2: u8 = 0;
    /// HCLK / 128
    pub const HCLK_DIV_128: u8 = 63;
    /// Longest data timeout the core accepts
    pub const MAX_DATA_TIMEOUT: u32 = 0x7FFF_FFFF;
    /// Settle time after the identification clock starts
    pub const DEFAULT_POWER_UP_TICKS: u32 = 16;

    /// Create default configuration
    pub const fn new() -> Self {
        Self {
            clk_rate_div: Self::HCLK_DIV_2,
            init_clk_rate_div: Self::HCLK_DIV_128,
            data_timeout: Self::MAX_DATA_TIMEOUT,
            power_up_ticks: Self::DEFAULT_POWER_UP_TICKS,
        }
    }

    /// Default configuration with a different high-speed divider
    pub const fn with_clock_divider(clk_rate_div: u8) -> Self {
        Self {
            clk_rate_div,
            ..Self::new()
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::new()
    }
}
