// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Static code tables: the translation from user-facing command/status
//! names to the receiver's 3-letter-prefix ISCP opcodes, and back.
//!
//! Every table here is built once, lazily, from small `const` name/code
//! lists and then indexed by [`crate::hash::sdbm`] — the "pre-hashed at
//! startup" static tables of spec §3. Input and mode code lists double as
//! both the command translator's forward lookup (name → code) and the
//! status parser's reverse lookup (code → name), generated from the same
//! source list so the two can never drift apart.

use crate::hash::sdbm;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Which physical zone a power/mute/etc event or command applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Main,
    Zone2,
    Zone3,
}

impl Zone {
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Zone::Main => "",
            Zone::Zone2 => "zone2",
            Zone::Zone3 => "zone3",
        }
    }
}

/// Handler family dispatched to by [`crate::translator::translate`].
#[derive(Debug, Clone, Copy)]
pub enum Handler {
    /// `up`/`down`/status only (e.g. dimmer, display, resolution).
    Standard,
    /// standard + on/off, with `toggle` only for AMT/ZMT/MT3 prefixes.
    Boolean { allow_toggle: bool },
    /// standard + ranged numeric argument.
    Ranged {
        lo: i32,
        hi: i32,
        offset: i32,
        fmt: RangedFormat,
    },
    /// standard + signed level in [-15, 12].
    SwLevel,
    /// standard + named input lookup; zone variants accept OFF/SOURCE.
    Input { zone_extra: bool },
    /// standard + named listening-mode lookup.
    Mode,
    /// standard + AM/FM tuner frequency.
    Tune,
    /// status/off/minutes-in-[0,90].
    Sleep,
    /// lock/unlock.
    Memory,
    /// mutates the owning receiver's virtual sleep timer; never enqueues.
    FakeSleep { zone: Zone },
    /// enqueues a fixed list of QSTN codes for one zone.
    Status,
    /// enqueues the argument verbatim with no prefix.
    Raw,
    /// closes the connection.
    Quit,
}

#[derive(Debug, Clone, Copy)]
pub enum RangedFormat {
    /// Two uppercase hex digits, e.g. volume, preset.
    TwoHexUpper,
    /// Three decimal digits with a forced trailing zero (avsync, tenths of ms).
    ThreeDecimalTrailingZero,
}

/// A client-facing command: `{hash, name, prefix, handler}` from spec §3.
#[derive(Debug, Clone)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub prefix: &'static str,
    pub handler: Handler,
}

/// `PWR`/`ZPW`/`PW3` power-status decode: `{zone, new_value, event}`.
#[derive(Debug, Clone, Copy)]
pub struct PowerEntry {
    pub zone: Zone,
    pub new_value: bool,
    pub event: &'static str,
}

/// Input code lookups shared by the `input` command family and the status
/// parser's `SLI`/`SLZ`/`SL3` reverse lookup.
pub const INPUT_NAMES: &[(&str, &str)] = &[
    ("vcr", "00"),
    ("cbl", "01"),
    ("sat", "01"),
    ("game", "02"),
    ("aux", "03"),
    ("aux2", "04"),
    ("pc", "05"),
    ("bd", "10"),
    ("dvd", "10"),
    ("tape", "20"),
    ("phono", "22"),
    ("cd", "23"),
    ("fm", "24"),
    ("am", "25"),
    ("tuner", "26"),
    ("music server", "27"),
    ("internet radio", "28"),
    ("usb", "29"),
    ("usb rear", "2A"),
    ("net", "2B"),
    ("bluetooth", "2E"),
    ("multichannel", "30"),
    ("xm", "31"),
    ("sirius", "32"),
];

/// Listening-mode lookups shared by the `mode` command family and the
/// status parser's `LMD` reverse lookup.
///
/// `pliigame` is deliberately `"86"`, not the `"85"` collision with
/// `neo6thx` present in one revision of the original source (§9).
pub const MODE_NAMES: &[(&str, &str)] = &[
    ("stereo", "00"),
    ("direct", "01"),
    ("surround", "02"),
    ("film", "03"),
    ("thx", "04"),
    ("action", "05"),
    ("musical", "06"),
    ("mono", "07"),
    ("orchestra", "08"),
    ("unplugged", "09"),
    ("studiomix", "0A"),
    ("tvlogic", "0B"),
    ("allchstereo", "0C"),
    ("theaterdimensional", "0D"),
    ("enhanced", "0E"),
    ("straightdecode", "40"),
    ("dolbyvirtual", "50"),
    ("neo6cinema", "82"),
    ("neo6music", "83"),
    ("pliimovie", "84"),
    ("neo6thx", "85"),
    ("pliigame", "86"),
    ("pliimusic", "87"),
];

/// Boolean/enum receiver status payloads that aren't power and aren't one
/// of the §4.4 step-5 numeric special cases: `{payload, event}`.
const STATIC_STATUS_PAYLOADS: &[(&str, &str)] = &[
    ("AMT00", "mute:off"),
    ("AMT01", "mute:on"),
    ("ZMT00", "zone2mute:off"),
    ("ZMT01", "zone2mute:on"),
    ("MT300", "zone3mute:off"),
    ("MT301", "zone3mute:on"),
    ("DIF00", "display:selector"),
    ("DIF01", "display:audio"),
    ("DIF02", "display:off"),
    ("DIM00", "dimmer:bright"),
    ("DIM01", "dimmer:dim"),
    ("DIM02", "dimmer:dark"),
    ("DIM03", "dimmer:off"),
    ("LTN00", "latenight:off"),
    ("LTN01", "latenight:on"),
    ("RAS00", "re-eq:off"),
    ("RAS01", "re-eq:on"),
    ("ADY00", "audyssey:off"),
    ("ADY01", "audyssey:on"),
    ("ADQ00", "dynamiceq:off"),
    ("ADQ01", "dynamiceq:on"),
    ("HDO00", "hdmiout:both"),
    ("HDO01", "hdmiout:main"),
    ("HDO02", "hdmiout:sub"),
    ("RES00", "resolution:auto"),
    ("RES01", "resolution:through"),
    ("RES02", "resolution:480p"),
    ("SLA00", "audioselector:off"),
    ("SLA01", "audioselector:on"),
    ("TGA00", "triggera:off"),
    ("TGA01", "triggera:on"),
    ("TGB00", "triggerb:off"),
    ("TGB01", "triggerb:on"),
    ("TGC00", "triggerc:off"),
    ("TGC01", "triggerc:on"),
    ("LOCK", "memory:locked"),
    ("UNLK", "memory:unlocked"),
];

const POWER_PAYLOADS: &[(&str, Zone, bool, &str)] = &[
    ("PWR00", Zone::Main, false, "power:off"),
    ("PWR01", Zone::Main, true, "power:on"),
    ("ZPW00", Zone::Zone2, false, "zone2power:off"),
    ("ZPW01", Zone::Zone2, true, "zone2power:on"),
    ("PW300", Zone::Zone3, false, "zone3power:off"),
    ("PW301", Zone::Zone3, true, "zone3power:on"),
];

fn boolean(prefix: &'static str, allow_toggle: bool) -> Handler {
    Handler::Boolean { allow_toggle }
}

const COMMANDS: &[(&str, &str, fn() -> Handler)] = &[
    ("power", "PWR", || boolean("PWR", false)),
    ("mute", "AMT", || boolean("AMT", true)),
    (
        "volume",
        "MVL",
        || Handler::Ranged { lo: 0, hi: 100, offset: 0, fmt: RangedFormat::TwoHexUpper },
    ),
    (
        "dbvolume",
        "MVL",
        || Handler::Ranged { lo: -82, hi: 18, offset: 82, fmt: RangedFormat::TwoHexUpper },
    ),
    ("input", "SLI", || Handler::Input { zone_extra: false }),
    ("mode", "LMD", || Handler::Mode),
    ("tune", "TUN", || Handler::Tune),
    (
        "preset",
        "PRS",
        || Handler::Ranged { lo: 0, hi: 40, offset: 0, fmt: RangedFormat::TwoHexUpper },
    ),
    ("sleep", "SLP", || Handler::Sleep),
    ("memory", "", || Handler::Memory),
    ("sw-level", "SWL", || Handler::SwLevel),
    (
        "avsync",
        "AVS",
        || Handler::Ranged { lo: 0, hi: 250, offset: 0, fmt: RangedFormat::ThreeDecimalTrailingZero },
    ),
    ("display", "DIF", || Handler::Standard),
    ("dimmer", "DIM", || Handler::Standard),
    ("latenight", "LTN", || boolean("LTN", false)),
    ("re-eq", "RAS", || boolean("RAS", false)),
    ("audyssey", "ADY", || boolean("ADY", false)),
    ("dynamiceq", "ADQ", || boolean("ADQ", false)),
    ("hdmiout", "HDO", || Handler::Standard),
    ("resolution", "RES", || Handler::Standard),
    ("audioselector", "SLA", || boolean("SLA", false)),
    ("triggera", "TGA", || boolean("TGA", false)),
    ("triggerb", "TGB", || boolean("TGB", false)),
    ("triggerc", "TGC", || boolean("TGC", false)),
    ("zone2power", "ZPW", || boolean("ZPW", false)),
    ("zone2mute", "ZMT", || boolean("ZMT", true)),
    (
        "zone2volume",
        "ZVL",
        || Handler::Ranged { lo: 0, hi: 100, offset: 0, fmt: RangedFormat::TwoHexUpper },
    ),
    ("zone2input", "SLZ", || Handler::Input { zone_extra: true }),
    ("zone2sleep", "", || Handler::FakeSleep { zone: Zone::Zone2 }),
    ("zone3power", "PW3", || boolean("PW3", false)),
    ("zone3mute", "MT3", || boolean("MT3", true)),
    (
        "zone3volume",
        "VL3",
        || Handler::Ranged { lo: 0, hi: 100, offset: 0, fmt: RangedFormat::TwoHexUpper },
    ),
    ("zone3input", "SL3", || Handler::Input { zone_extra: true }),
    ("zone3sleep", "", || Handler::FakeSleep { zone: Zone::Zone3 }),
    ("status", "", || Handler::Status),
    ("raw", "", || Handler::Raw),
    ("quit", "", || Handler::Quit),
];

pub fn command_table() -> &'static HashMap<u64, CommandDescriptor> {
    static TABLE: OnceLock<HashMap<u64, CommandDescriptor>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::with_capacity(COMMANDS.len());
        for &(name, prefix, make_handler) in COMMANDS {
            map.insert(
                sdbm(name),
                CommandDescriptor {
                    name,
                    prefix,
                    handler: make_handler(),
                },
            );
        }
        map
    })
}

pub fn status_table() -> &'static HashMap<u64, &'static str> {
    static TABLE: OnceLock<HashMap<u64, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::new();
        for &(payload, event) in STATIC_STATUS_PAYLOADS {
            map.insert(sdbm(payload), event);
        }
        map
    })
}

/// Leaked, 'static event strings generated from the input/mode tables —
/// built once at startup and never freed, matching the "read-only after
/// init, released at shutdown" lifetime spec §3 describes for static tables
/// (process exit reclaims them).
fn leak(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

pub fn input_status_table() -> &'static HashMap<u64, &'static str> {
    static TABLE: OnceLock<HashMap<u64, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::new();
        for &(zone_prefix, key) in &[("SLI", "input"), ("SLZ", "zone2input"), ("SL3", "zone3input")] {
            for &(name, code) in INPUT_NAMES {
                let payload = format!("{zone_prefix}{code}");
                map.entry(sdbm(&payload))
                    .or_insert_with(|| leak(format!("{key}:{name}")));
            }
            if zone_prefix != &"SLI" {
                map.insert(sdbm(&format!("{zone_prefix}7F")), leak(format!("{key}:off")));
                map.insert(sdbm(&format!("{zone_prefix}80")), leak(format!("{key}:source")));
            }
        }
        map
    })
}

pub fn mode_status_table() -> &'static HashMap<u64, &'static str> {
    static TABLE: OnceLock<HashMap<u64, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::new();
        for &(name, code) in MODE_NAMES {
            let payload = format!("LMD{code}");
            map.entry(sdbm(&payload))
                .or_insert_with(|| leak(format!("mode:{name}")));
        }
        map
    })
}

pub fn power_table() -> &'static HashMap<u64, PowerEntry> {
    static TABLE: OnceLock<HashMap<u64, PowerEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map = HashMap::with_capacity(POWER_PAYLOADS.len());
        for &(payload, zone, new_value, event) in POWER_PAYLOADS {
            map.insert(sdbm(payload), PowerEntry { zone, new_value, event });
        }
        map
    })
}

/// Uppercase-name lookup for the `input`/`mode` handler families.
pub fn input_code(name: &str) -> Option<&'static str> {
    INPUT_NAMES
        .iter()
        .find(|&&(n, _)| n.eq_ignore_ascii_case(name))
        .map(|&(_, c)| c)
}

pub fn mode_code(name: &str) -> Option<&'static str> {
    MODE_NAMES
        .iter()
        .find(|&&(n, _)| n.eq_ignore_ascii_case(name))
        .map(|&(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_table_has_no_hash_collisions_among_names() {
        let table = command_table();
        assert_eq!(table.len(), COMMANDS.len(), "two command names hashed equal");
    }

    #[test]
    fn power_table_round_trips_main_zone() {
        let table = power_table();
        let entry = table.get(&sdbm("PWR01")).expect("PWR01 present");
        assert!(matches!(entry.zone, Zone::Main));
        assert!(entry.new_value);
        assert_eq!(entry.event, "power:on");
    }

    #[test]
    fn pliigame_is_not_the_collision_bug_value() {
        assert_eq!(mode_code("pliigame"), Some("86"));
        assert_eq!(mode_code("neo6thx"), Some("85"));
        assert_ne!(mode_code("pliigame"), mode_code("neo6thx"));
    }

    #[test]
    fn input_status_table_decodes_zone_extras() {
        let table = input_status_table();
        assert_eq!(table.get(&sdbm("SLZ7F")).copied(), Some("zone2input:off"));
        assert_eq!(table.get(&sdbm("SL380")).copied(), Some("zone3input:source"));
    }

    #[test]
    fn input_code_lookup_is_case_insensitive() {
        assert_eq!(input_code("CD"), Some("23"));
        assert_eq!(input_code("cd"), Some("23"));
    }
}
