//! OBIS Codes and DLMS Units
//!
//! OBIS identifiers have six value groups `A-B:C.D.E*F`. Meters usually
//! show only the `C.D.E` part, with a few reserved C values written as
//! letters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Codes shown with emphasis in live views: import/export energy, meter
/// serial and firmware version
pub const HIGHLIGHTED_CODES: [&str; 4] = ["1.8.0", "2.8.0", "C.1.0", "0.2.0"];

/// A six-group OBIS identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObisCode(pub [u8; 6]);

impl ObisCode {
    /// Build from an SML object name, which must be exactly six bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 6]>::try_from(bytes).ok().map(ObisCode)
    }

    /// Short `C.D.E` form, e.g. `1.8.0` or `C.1.0`
    pub fn short(&self) -> String {
        let [_, _, c, d, e, _] = self.0;
        format!("{}.{}.{}", group_c(c), d, e)
    }

    /// Full `A-B:C.D.E*F` form
    pub fn full(&self) -> String {
        let [a, b, c, d, e, f] = self.0;
        format!("{}-{}:{}.{}.{}*{}", a, b, group_c(c), d, e, f)
    }

    /// Whether live views should emphasise this code
    pub fn is_highlighted(&self) -> bool {
        let short = self.short();
        HIGHLIGHTED_CODES.contains(&short.as_str())
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

fn group_c(c: u8) -> String {
    match c {
        96 => "C".to_string(),
        97 => "F".to_string(),
        98 => "L".to_string(),
        99 => "P".to_string(),
        other => other.to_string(),
    }
}

/// Symbol for a DLMS unit code (IEC 62056-62), if known
pub fn unit_symbol(code: u8) -> Option<&'static str> {
    let symbol = match code {
        1 => "a",
        2 => "mo",
        3 => "wk",
        4 => "d",
        5 => "h",
        6 => "min",
        7 => "s",
        8 => "°",
        9 => "°C",
        10 => "currency",
        11 => "m",
        12 => "m/s",
        13 | 14 => "m³",
        15 | 16 => "m³/h",
        17 | 18 => "m³/d",
        19 => "l",
        20 => "kg",
        21 => "N",
        22 => "Nm",
        23 => "Pa",
        24 => "bar",
        25 => "J",
        26 => "J/h",
        27 => "W",
        28 => "VA",
        29 => "var",
        30 => "Wh",
        31 => "VAh",
        32 => "varh",
        33 => "A",
        34 => "C",
        35 => "V",
        36 => "V/m",
        37 => "F",
        38 => "Ω",
        39 => "Ωm²/m",
        40 => "Wb",
        41 => "T",
        42 => "A/m",
        43 => "H",
        44 => "Hz",
        45 => "1/(Wh)",
        46 => "1/(varh)",
        47 => "1/(VAh)",
        48 => "V²h",
        49 => "A²h",
        50 => "kg/s",
        51 => "S",
        52 => "K",
        53 => "1/(V²h)",
        54 => "1/(A²h)",
        55 => "1/m³",
        56 => "%",
        57 => "Ah",
        60 => "Wh/m³",
        61 => "J/m³",
        62 => "Mol %",
        63 => "g/m³",
        64 => "Pa s",
        255 => "count",
        _ => return None,
    };
    Some(symbol)
}
