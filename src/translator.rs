// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command translator (spec §4.3): maps one client line to zero or more
//! receiver opcodes, enqueued on the owning `Receiver`'s queue.

use crate::hash::sdbm;
use crate::receiver::Receiver;
use crate::tables::{self, Handler, RangedFormat, Zone};

/// Longest opcode suffix the envelope `"!1" <code> "\r\n"` can carry before
/// exceeding the 64-byte connection buffer used elsewhere in the daemon.
const MAX_CODE_LEN: usize = 60;

/// Result of translating one client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Accepted. `events` carries any broadcast lines the handler produced
    /// directly (only the fake-sleep family does this; everything else just
    /// enqueues and produces no events of its own).
    Ok { events: Vec<String> },
    Invalid,
    Quit,
}

fn ok() -> Outcome {
    Outcome::Ok { events: Vec::new() }
}

/// Translate one already-trimmed client line against `receiver`'s state and
/// queue.
pub fn translate<T>(receiver: &mut Receiver<T>, line: &str, now: crate::clock::Timestamp) -> Outcome {
    let (name, arg) = match line.split_once(' ') {
        Some((n, a)) => (n, a),
        None => (line, ""),
    };

    let Some(descriptor) = tables::command_table().get(&sdbm(name)) else {
        return Outcome::Invalid;
    };

    match descriptor.handler {
        Handler::Standard => dispatch_standard(receiver, descriptor.prefix, arg),
        Handler::Boolean { allow_toggle } => dispatch_boolean(receiver, descriptor.prefix, arg, allow_toggle),
        Handler::Ranged { lo, hi, offset, fmt } => dispatch_ranged(receiver, descriptor.prefix, arg, lo, hi, offset, fmt),
        Handler::SwLevel => dispatch_swlevel(receiver, descriptor.prefix, arg),
        Handler::Input { zone_extra } => dispatch_input(receiver, descriptor.prefix, arg, zone_extra),
        Handler::Mode => dispatch_mode(receiver, descriptor.prefix, arg),
        Handler::Tune => dispatch_tune(receiver, descriptor.prefix, arg),
        Handler::Sleep => dispatch_sleep(receiver, descriptor.prefix, arg),
        Handler::Memory => dispatch_memory(receiver, descriptor.prefix, arg),
        Handler::FakeSleep { zone } => dispatch_fakesleep(receiver, zone, arg, now),
        Handler::Status => dispatch_status(receiver, arg),
        Handler::Raw => dispatch_raw(receiver, arg),
        Handler::Quit => Outcome::Quit,
    }
}

/// `standard(verb)`: common prefix shared by every handler family that takes
/// a verb argument. Returns `Some(suffix)` if `arg` was one of the standard
/// verbs, `None` if the family-specific handler should take over.
fn standard_suffix(arg: &str) -> Option<&'static str> {
    match arg {
        "" | "status" => Some("QSTN"),
        "up" => Some("UP"),
        "down" => Some("DOWN"),
        _ => None,
    }
}

fn enqueue<T>(receiver: &mut Receiver<T>, prefix: &str, suffix: &str) -> Outcome {
    let code = format!("{prefix}{suffix}");
    if code.len() > MAX_CODE_LEN {
        return Outcome::Invalid;
    }
    receiver.queue.enqueue(code);
    ok()
}

fn dispatch_standard<T>(receiver: &mut Receiver<T>, prefix: &str, arg: &str) -> Outcome {
    match standard_suffix(arg) {
        Some(suffix) => enqueue(receiver, prefix, suffix),
        None => Outcome::Invalid,
    }
}

fn dispatch_boolean<T>(receiver: &mut Receiver<T>, prefix: &str, arg: &str, allow_toggle: bool) -> Outcome {
    if let Some(suffix) = standard_suffix(arg) {
        return enqueue(receiver, prefix, suffix);
    }
    match arg {
        "on" => enqueue(receiver, prefix, "01"),
        "off" => enqueue(receiver, prefix, "00"),
        "toggle" if allow_toggle => enqueue(receiver, prefix, "TG"),
        _ => Outcome::Invalid,
    }
}

fn parse_full_i32(arg: &str) -> Option<i32> {
    // `str::parse` already rejects any trailing garbage since it must
    // consume the whole string; this wrapper just documents that.
    arg.parse::<i32>().ok()
}

fn dispatch_ranged<T>(
    receiver: &mut Receiver<T>,
    prefix: &str,
    arg: &str,
    lo: i32,
    hi: i32,
    offset: i32,
    fmt: RangedFormat,
) -> Outcome {
    if let Some(suffix) = standard_suffix(arg) {
        return enqueue(receiver, prefix, suffix);
    }
    let Some(value) = parse_full_i32(arg) else {
        return Outcome::Invalid;
    };
    if value < lo || value > hi {
        return Outcome::Invalid;
    }
    let encoded = value + offset;
    let suffix = match fmt {
        RangedFormat::TwoHexUpper => format!("{encoded:02X}"),
        RangedFormat::ThreeDecimalTrailingZero => {
            if encoded % 10 != 0 {
                return Outcome::Invalid;
            }
            format!("{encoded:03}")
        }
    };
    enqueue(receiver, prefix, &suffix)
}

fn dispatch_swlevel<T>(receiver: &mut Receiver<T>, prefix: &str, arg: &str) -> Outcome {
    if let Some(suffix) = standard_suffix(arg) {
        return enqueue(receiver, prefix, suffix);
    }
    let Some(value) = parse_full_i32(arg) else {
        return Outcome::Invalid;
    };
    if !(-15..=12).contains(&value) {
        return Outcome::Invalid;
    }
    let suffix = match value.cmp(&0) {
        std::cmp::Ordering::Equal => "00".to_string(),
        std::cmp::Ordering::Greater => format!("+{value:X}"),
        std::cmp::Ordering::Less => format!("-{:X}", -value),
    };
    enqueue(receiver, prefix, &suffix)
}

fn dispatch_input<T>(receiver: &mut Receiver<T>, prefix: &str, arg: &str, zone_extra: bool) -> Outcome {
    if let Some(suffix) = standard_suffix(arg) {
        return enqueue(receiver, prefix, suffix);
    }
    let upper = arg.to_ascii_uppercase();
    if zone_extra {
        if upper == "OFF" {
            return enqueue(receiver, prefix, "7F");
        }
        if upper == "SOURCE" {
            return enqueue(receiver, prefix, "80");
        }
    }
    match tables::input_code(arg) {
        Some(code) => enqueue(receiver, prefix, code),
        None => Outcome::Invalid,
    }
}

fn dispatch_mode<T>(receiver: &mut Receiver<T>, prefix: &str, arg: &str) -> Outcome {
    if let Some(suffix) = standard_suffix(arg) {
        return enqueue(receiver, prefix, suffix);
    }
    match tables::mode_code(arg) {
        Some(code) => enqueue(receiver, prefix, code),
        None => Outcome::Invalid,
    }
}

/// Parse `"F.D"` with exactly one fractional digit, both as integers, per
/// the deterministic-equivalent note in spec §9 (no floating point).
fn parse_fm(arg: &str) -> Option<(i32, i32)> {
    let (int_part, frac_part) = arg.split_once('.')?;
    if frac_part.len() != 1 || !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let f: i32 = int_part.parse().ok()?;
    let d: i32 = frac_part.parse().ok()?;
    Some((f, d))
}

fn dispatch_tune<T>(receiver: &mut Receiver<T>, prefix: &str, arg: &str) -> Outcome {
    if let Some(suffix) = standard_suffix(arg) {
        return enqueue(receiver, prefix, suffix);
    }
    if arg.contains('.') {
        let Some((f, d)) = parse_fm(arg) else {
            return Outcome::Invalid;
        };
        let tenths = f * 10 + d;
        if !(875..=1079).contains(&tenths) {
            return Outcome::Invalid;
        }
        let suffix = format!("{:05}", f * 100 + d * 10);
        enqueue(receiver, prefix, &suffix)
    } else {
        let Some(khz) = parse_full_i32(arg) else {
            return Outcome::Invalid;
        };
        if !(530..=1710).contains(&khz) {
            return Outcome::Invalid;
        }
        enqueue(receiver, prefix, &format!("{khz:05}"))
    }
}

fn dispatch_sleep<T>(receiver: &mut Receiver<T>, prefix: &str, arg: &str) -> Outcome {
    match arg {
        "" | "status" => enqueue(receiver, prefix, "QSTN"),
        "off" => enqueue(receiver, prefix, "OFF"),
        _ => {
            let Some(mins) = parse_full_i32(arg) else {
                return Outcome::Invalid;
            };
            if !(0..=90).contains(&mins) {
                return Outcome::Invalid;
            }
            enqueue(receiver, prefix, &format!("{mins:02X}"))
        }
    }
}

fn dispatch_memory<T>(receiver: &mut Receiver<T>, prefix: &str, arg: &str) -> Outcome {
    match arg {
        "lock" => enqueue(receiver, prefix, "LOCK"),
        "unlock" => enqueue(receiver, prefix, "UNLK"),
        _ => Outcome::Invalid,
    }
}

fn remaining_minutes(deadline: crate::clock::Timestamp, now: crate::clock::Timestamp) -> u64 {
    match crate::clock::Timestamp::diff(deadline, now) {
        crate::clock::Diff::Positive(d) if d.positive() => {
            let micros = d.secs * 1_000_000 + d.micros as u64;
            (micros + 59_999_999) / 60_000_000
        }
        _ => 0,
    }
}

fn dispatch_fakesleep<T>(receiver: &mut Receiver<T>, zone: Zone, arg: &str, now: crate::clock::Timestamp) -> Outcome {
    let (deadline_field, zone_char, key): (&mut crate::clock::Timestamp, char, &str) = match zone {
        Zone::Zone2 => (&mut receiver.zone2_sleep, '2', "zone2sleep"),
        Zone::Zone3 => (&mut receiver.zone3_sleep, '3', "zone3sleep"),
        Zone::Main => unreachable!("fakesleep is only defined for zone2/zone3"),
    };
    match arg {
        "" | "status" => {}
        "off" => *deadline_field = crate::clock::Timestamp::ZERO,
        _ => {
            let Some(n) = parse_full_i32(arg) else {
                return Outcome::Invalid;
            };
            if n < 0 {
                return Outcome::Invalid;
            }
            *deadline_field = now.saturating_add(std::time::Duration::from_secs(n as u64 * 60));
        }
    }
    let mins = remaining_minutes(*deadline_field, now);
    let _ = zone_char;
    Outcome::Ok { events: vec![format!("{key}:{mins}")] }
}

fn dispatch_status<T>(receiver: &mut Receiver<T>, arg: &str) -> Outcome {
    let codes: &[&str] = match arg {
        "" | "main" => &["PWR", "MVL", "AMT", "SLI", "LMD", "TUN"],
        "zone2" => &["ZPW", "ZVL", "ZMT", "SLZ", "TUZ"],
        "zone3" => &["PW3", "VL3", "MT3", "SL3", "TU3"],
        _ => return Outcome::Invalid,
    };
    for &prefix in codes {
        receiver.queue.enqueue(format!("{prefix}QSTN"));
    }
    ok()
}

fn dispatch_raw<T>(receiver: &mut Receiver<T>, arg: &str) -> Outcome {
    if arg.len() > MAX_CODE_LEN {
        return Outcome::Invalid;
    }
    receiver.queue.enqueue(arg.to_string());
    ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;

    fn receiver() -> Receiver<()> {
        Receiver::new(())
    }

    fn pop<T>(r: &mut Receiver<T>) -> Option<String> {
        r.queue.pop_gated(0b111)
    }

    #[test]
    fn power_on_enqueues_pwr01() {
        let mut r = receiver();
        assert_eq!(translate(&mut r, "power on", Timestamp::ZERO), ok());
        assert_eq!(pop(&mut r), Some("PWR01".to_string()));
    }

    #[test]
    fn volume_boundary_cases() {
        let mut r = receiver();
        assert_eq!(translate(&mut r, "volume 0", Timestamp::ZERO), ok());
        assert_eq!(translate(&mut r, "volume 100", Timestamp::ZERO), ok());
        assert_eq!(translate(&mut r, "volume 101", Timestamp::ZERO), Outcome::Invalid);
    }

    #[test]
    fn volume_42_hex_encodes_2a() {
        let mut r = receiver();
        translate(&mut r, "volume 42", Timestamp::ZERO);
        assert_eq!(pop(&mut r), Some("MVL2A".to_string()));
    }

    #[test]
    fn sleep_boundary_cases() {
        let mut r = receiver();
        assert_eq!(translate(&mut r, "sleep 0", Timestamp::ZERO), ok());
        assert_eq!(translate(&mut r, "sleep 90", Timestamp::ZERO), ok());
        assert_eq!(translate(&mut r, "sleep 91", Timestamp::ZERO), Outcome::Invalid);
    }

    #[test]
    fn fm_boundary_cases() {
        let mut r = receiver();
        assert_eq!(translate(&mut r, "tune 87.5", Timestamp::ZERO), ok());
        assert_eq!(translate(&mut r, "tune 87.4", Timestamp::ZERO), Outcome::Invalid);
        assert_eq!(translate(&mut r, "tune 107.9", Timestamp::ZERO), ok());
        assert_eq!(translate(&mut r, "tune 108.0", Timestamp::ZERO), Outcome::Invalid);
    }

    #[test]
    fn am_boundary_cases() {
        let mut r = receiver();
        assert_eq!(translate(&mut r, "tune 530", Timestamp::ZERO), ok());
        assert_eq!(translate(&mut r, "tune 529", Timestamp::ZERO), Outcome::Invalid);
        assert_eq!(translate(&mut r, "tune 1710", Timestamp::ZERO), ok());
        assert_eq!(translate(&mut r, "tune 1711", Timestamp::ZERO), Outcome::Invalid);
    }

    #[test]
    fn tune_979_encodes_five_digit_tenths() {
        let mut r = receiver();
        translate(&mut r, "tune 97.9", Timestamp::ZERO);
        assert_eq!(pop(&mut r), Some("TUN09790".to_string()));
    }

    #[test]
    fn swlevel_boundary_cases() {
        let mut r = receiver();
        translate(&mut r, "sw-level -15", Timestamp::ZERO);
        assert_eq!(pop(&mut r), Some("SWL-F".to_string()));
        translate(&mut r, "sw-level 12", Timestamp::ZERO);
        assert_eq!(pop(&mut r), Some("SWL+C".to_string()));
        translate(&mut r, "sw-level 0", Timestamp::ZERO);
        assert_eq!(pop(&mut r), Some("SWL00".to_string()));
        assert_eq!(translate(&mut r, "sw-level 13", Timestamp::ZERO), Outcome::Invalid);
    }

    #[test]
    fn memory_lock_and_unlock_enqueue_bare_codes() {
        let mut r = receiver();
        translate(&mut r, "memory lock", Timestamp::ZERO);
        assert_eq!(pop(&mut r), Some("LOCK".to_string()));
        translate(&mut r, "memory unlock", Timestamp::ZERO);
        assert_eq!(pop(&mut r), Some("UNLK".to_string()));
    }

    #[test]
    fn unknown_command_is_invalid() {
        let mut r = receiver();
        assert_eq!(translate(&mut r, "garbage", Timestamp::ZERO), Outcome::Invalid);
    }

    #[test]
    fn quit_returns_quit() {
        let mut r = receiver();
        assert_eq!(translate(&mut r, "quit", Timestamp::ZERO), Outcome::Quit);
    }

    #[test]
    fn toggle_only_allowed_on_mute_family() {
        let mut r = receiver();
        assert_eq!(translate(&mut r, "mute toggle", Timestamp::ZERO), ok());
        assert_eq!(translate(&mut r, "power toggle", Timestamp::ZERO), Outcome::Invalid);
    }

    #[test]
    fn zone2sleep_sets_deadline_and_broadcasts_minutes() {
        let mut r = receiver();
        let t0 = Timestamp::new(1_000, 0);
        let outcome = translate(&mut r, "zone2sleep 5", t0);
        assert_eq!(outcome, Outcome::Ok { events: vec!["zone2sleep:5".to_string()] });
        assert_eq!(r.zone2_sleep, Timestamp::new(1_300, 0));
    }

    #[test]
    fn zone2sleep_off_clears_deadline() {
        let mut r = receiver();
        let t0 = Timestamp::new(1_000, 0);
        translate(&mut r, "zone2sleep 5", t0);
        let outcome = translate(&mut r, "zone2sleep off", t0);
        assert_eq!(outcome, Outcome::Ok { events: vec!["zone2sleep:0".to_string()] });
        assert!(r.zone2_sleep.is_zero());
    }

    #[test]
    fn status_enqueues_fixed_list_for_main() {
        let mut r = receiver();
        translate(&mut r, "status", Timestamp::ZERO);
        assert_eq!(pop(&mut r), Some("PWRQSTN".to_string()));
        assert_eq!(pop(&mut r), Some("MVLQSTN".to_string()));
        assert_eq!(pop(&mut r), Some("AMTQSTN".to_string()));
        assert_eq!(pop(&mut r), Some("SLIQSTN".to_string()));
        assert_eq!(pop(&mut r), Some("LMDQSTN".to_string()));
        assert_eq!(pop(&mut r), Some("TUNQSTN".to_string()));
    }

    #[test]
    fn input_lookup_is_case_insensitive_and_uppercases_zone_extras() {
        let mut r = receiver();
        translate(&mut r, "zone2input off", Timestamp::ZERO);
        assert_eq!(pop(&mut r), Some("SLZ7F".to_string()));
        translate(&mut r, "input CD", Timestamp::ZERO);
        assert_eq!(pop(&mut r), Some("SLI23".to_string()));
    }
}
