//! IEEE-488.2 common commands.

pub const IDN: &str = "*IDN";
pub const RST: &str = "*RST";
pub const CLS: &str = "*CLS";
pub const OPC: &str = "*OPC";
pub const ESR: &str = "*ESR";
pub const STB: &str = "*STB";

/// Not common, but every SCPI instrument has it.
pub const SYST_ERR: &str = "SYST:ERR";
