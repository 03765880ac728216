// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Status parser (spec §4.4): maps one receiver reply into normalized
//! broadcast events, mutating receiver power/sleep state along the way.

use crate::hash::sdbm;
use crate::receiver::{Receiver, POWER_MAIN, POWER_ZONE2, POWER_ZONE3};
use crate::tables::{self, Zone};

/// Canonical error broadcast for an unparseable receiver reply.
pub const RECEIVER_ERROR: &str = "ERROR:Receiver Error";

/// One or more normalized broadcast events produced by one receiver reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    Events(Vec<String>),
    ParseError,
}

/// Locate `"!1"` within `buf` (NUL-safe — a plain byte search, not a C
/// string search) and return the payload that follows up to the first NUL
/// or end of buffer.
fn extract_payload(buf: &[u8]) -> Option<&[u8]> {
    let pos = buf.windows(2).position(|w| w == b"!1")?;
    let rest = &buf[pos + 2..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// Parse one receiver reply. `buf` may contain leading noise and embedded
/// NULs; the design tolerates both (spec §4.4 step 1-2).
pub fn parse<T>(receiver: &mut Receiver<T>, buf: &[u8]) -> ParseOutcome {
    receiver.msgs_received += 1;

    let Some(payload) = extract_payload(buf) else {
        return ParseOutcome::ParseError;
    };
    let payload = match std::str::from_utf8(payload) {
        Ok(s) => s,
        Err(_) => return ParseOutcome::ParseError,
    };

    let hash = sdbm(payload);

    if let Some(&event) = tables::status_table().get(&hash) {
        return ParseOutcome::Events(vec![event.to_string()]);
    }
    if let Some(&event) = tables::input_status_table().get(&hash) {
        return ParseOutcome::Events(vec![event.to_string()]);
    }
    if let Some(&event) = tables::mode_status_table().get(&hash) {
        return ParseOutcome::Events(vec![event.to_string()]);
    }
    if let Some(entry) = tables::power_table().get(&hash) {
        let bit = match entry.zone {
            Zone::Main => POWER_MAIN,
            Zone::Zone2 => POWER_ZONE2,
            Zone::Zone3 => POWER_ZONE3,
        };
        receiver.set_power(bit, entry.new_value);
        if !entry.new_value {
            match entry.zone {
                Zone::Zone2 => receiver.zone2_sleep = crate::clock::Timestamp::ZERO,
                Zone::Zone3 => receiver.zone3_sleep = crate::clock::Timestamp::ZERO,
                Zone::Main => {}
            }
        }
        return ParseOutcome::Events(vec![entry.event.to_string()]);
    }

    if payload.len() >= 3 {
        if let Some(events) = decode_numeric(payload) {
            return ParseOutcome::Events(events);
        }
    }

    ParseOutcome::Events(vec![format!("todo:{payload}")])
}

fn decode_numeric(payload: &str) -> Option<Vec<String>> {
    let (prefix, suffix) = payload.split_at(3);
    match prefix {
        "MVL" | "ZVL" | "VL3" => {
            let v = i64::from_str_radix(suffix, 16).ok()?;
            let (vol_key, db_key) = match prefix {
                "MVL" => ("volume", "dbvolume"),
                "ZVL" => ("zone2volume", "zone2dbvolume"),
                _ => ("zone3volume", "zone3dbvolume"),
            };
            Some(vec![format!("{vol_key}:{v}"), format!("{db_key}:{}", v - 82)])
        }
        "TUN" | "TUZ" | "TU3" => {
            let f: i64 = suffix.parse().ok()?;
            let label = match prefix {
                "TUN" => "tune",
                "TUZ" => "zone2tune",
                _ => "zone3tune",
            };
            if f > 8000 {
                Some(vec![format!("{label}:{}.{} FM", f / 100, (f / 10) % 10)])
            } else {
                Some(vec![format!("{label}:{f} AM")])
            }
        }
        "PRS" | "PRZ" | "PR3" => {
            let v = i64::from_str_radix(suffix, 16).ok()?;
            let key = match prefix {
                "PRS" => "preset",
                "PRZ" => "zone2preset",
                _ => "zone3preset",
            };
            Some(vec![format!("{key}:{v}")])
        }
        "SLP" => {
            let v = i64::from_str_radix(suffix, 16).ok()?;
            Some(vec![format!("sleep:{v}")])
        }
        "SWL" => {
            let v = i64::from_str_radix(suffix, 16).ok()?;
            Some(vec![format!("swlevel:{v:+}")])
        }
        "AVS" => {
            let v: i64 = suffix.parse().ok()?;
            Some(vec![format!("avsync:{}", v / 10)])
        }
        _ => None,
    }
}
