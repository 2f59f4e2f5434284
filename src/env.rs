// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Process-wide runtime configuration, read once from the environment.
//!
//! All knobs are plain environment variables in the `direct_bt.` namespace.
//! `direct_bt.debug` and `direct_bt.verbose` additionally accept the explode
//! syntax, a comma list `name[=value],...` where each element sets
//! `direct_bt.name=value` (value defaults to `true`) before the config is
//! captured.

use lazy_static::lazy_static;
use std::time;

lazy_static! {
    static ref ENV: Env = Env::from_env();
}

/// Immutable snapshot of the `direct_bt.*` environment, captured on first use.
pub struct Env {
    startup: time::Instant,
    /// `direct_bt.debug`: master debug switch, explode syntax accepted.
    pub debug: bool,
    /// `direct_bt.verbose`: verbose output, implied by [Env::debug].
    pub verbose: bool,
    /// `direct_bt.mgmt.reader.timeout`: poll timeout of the MGMT reader thread, in ms.
    pub mgmt_reader_timeout_ms: u32,
    /// `direct_bt.mgmt.cmd.timeout`: MGMT command reply timeout, in ms.
    pub mgmt_cmd_timeout_ms: u32,
    /// `direct_bt.mgmt.ringsize`: capacity of the MGMT reply ring buffer.
    pub mgmt_ring_capacity: usize,
    /// `direct_bt.debug.mgmt.event`: trace every MGMT frame at debug level.
    pub debug_mgmt_event: bool,
}

impl Env {
    /// The process-wide configuration singleton.
    pub fn get() -> &'static Env {
        &ENV
    }

    fn from_env() -> Env {
        let debug = explode_properties("direct_bt.debug");
        let verbose = explode_properties("direct_bt.verbose") || debug;
        Env {
            startup: time::Instant::now(),
            debug,
            verbose,
            mgmt_reader_timeout_ms: u32_property("direct_bt.mgmt.reader.timeout", 10_000, 1_500, u32::MAX),
            mgmt_cmd_timeout_ms: u32_property("direct_bt.mgmt.cmd.timeout", 3_000, 1_500, u32::MAX),
            mgmt_ring_capacity: u32_property("direct_bt.mgmt.ringsize", 64, 64, 1_024) as usize,
            debug_mgmt_event: bool_property("direct_bt.debug.mgmt.event", false),
        }
    }

    /// Milliseconds elapsed since the configuration was captured at startup.
    ///
    /// All timestamps handed to listeners use this clock.
    pub fn elapsed_ms(&self) -> u64 {
        self.startup.elapsed().as_millis() as u64
    }
}

fn property(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn bool_property(name: &str, default: bool) -> bool {
    match property(name) {
        Some(v) => v == "true",
        None => default,
    }
}

fn u32_property(name: &str, default: u32, min: u32, max: u32) -> u32 {
    let Some(value) = property(name) else {
        return default;
    };
    match value.parse::<u32>() {
        Ok(v) if (min..=max).contains(&v) => v,
        Ok(v) => {
            log::error!("env {name}: {v} outside [{min}..{max}], using default {default}");
            default
        }
        Err(_) => {
            log::error!("env {name}: invalid value '{value}', using default {default}");
            default
        }
    }
}

/// Evaluates an exploding property domain such as `direct_bt.debug`.
///
/// `false` and unset leave the domain off; `true` switches it on; any other
/// value is exploded into `<domain>.<name>=<value>` child properties and the
/// domain reports on.
fn explode_properties(domain: &str) -> bool {
    let Some(value) = property(domain) else {
        return false;
    };
    match value.as_str() {
        "false" => false,
        "true" => true,
        list => {
            for elem in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                let (name, value) = match elem.split_once('=') {
                    Some((n, v)) => (n.trim(), v.trim()),
                    None => (elem, ""),
                };
                if name.is_empty() {
                    continue;
                }
                let key = format!("{domain}.{name}");
                let value = if value.is_empty() { "true" } else { value };
                std::env::set_var(key, value);
            }
            std::env::set_var(domain, "true");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_property_out_of_range_falls_back() {
        std::env::set_var("direct_bt.test.ringsize", "4");
        assert_eq!(64, u32_property("direct_bt.test.ringsize", 64, 64, 1024));
        std::env::set_var("direct_bt.test.ringsize", "128");
        assert_eq!(128, u32_property("direct_bt.test.ringsize", 64, 64, 1024));
        std::env::set_var("direct_bt.test.ringsize", "not-a-number");
        assert_eq!(64, u32_property("direct_bt.test.ringsize", 64, 64, 1024));
    }

    #[test]
    fn explode_sets_child_properties() {
        std::env::set_var("direct_bt.test.explode", "mgmt.event=true,ringsize=256,flag");
        assert!(explode_properties("direct_bt.test.explode"));
        assert_eq!(Some("true".into()), property("direct_bt.test.explode.mgmt.event"));
        assert_eq!(Some("256".into()), property("direct_bt.test.explode.ringsize"));
        assert_eq!(Some("true".into()), property("direct_bt.test.explode.flag"));
        assert_eq!(Some("true".into()), property("direct_bt.test.explode"));
    }

    #[test]
    fn plain_booleans_do_not_explode() {
        std::env::set_var("direct_bt.test.plain", "false");
        assert!(!explode_properties("direct_bt.test.plain"));
        std::env::set_var("direct_bt.test.plain", "true");
        assert!(explode_properties("direct_bt.test.plain"));
    }
}
