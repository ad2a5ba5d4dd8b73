// KawPow Runner - Free and Open Source Software Statement
//
// This project, kawpow-runner, is Free and Open Source Software (FOSS) licensed
// under the MIT License. You are free to use, modify, and distribute this
// software in accordance with the license terms. Contributions are welcome
// via pull requests to the project repository.
//
// File: src/utils/format.rs
// Version: 1.1.0
//
// Formatting helpers for log lines and the benchmark report: hashrates,
// nonce counts and memory sizes.
//
// Tree Location:
// - src/utils/format.rs (formatting utilities)
// - Depends on: std

/// Utility functions for formatting runner statistics
pub struct FormatUtils;

impl FormatUtils {
    /// Format hashrate in appropriate units (H/s, KH/s, MH/s, GH/s)
    pub fn format_hashrate(hashrate: f64) -> String {
        if hashrate >= 1_000_000_000.0 {
            format!("{:.2} GH/s", hashrate / 1_000_000_000.0)
        } else if hashrate >= 1_000_000.0 {
            format!("{:.2} MH/s", hashrate / 1_000_000.0)
        } else if hashrate >= 1_000.0 {
            format!("{:.2} KH/s", hashrate / 1_000.0)
        } else {
            format!("{:.2} H/s", hashrate)
        }
    }

    /// Format large numbers with suffixes (K, M, B)
    pub fn format_number(num: u64) -> String {
        if num >= 1_000_000_000 {
            format!("{:.1}B", num as f64 / 1_000_000_000.0)
        } else if num >= 1_000_000 {
            format!("{:.1}M", num as f64 / 1_000_000.0)
        } else if num >= 1_000 {
            format!("{:.1}K", num as f64 / 1_000.0)
        } else {
            num.to_string()
        }
    }

    /// Format a byte count in binary units (B, KiB, MiB, GiB)
    pub fn format_bytes(bytes: u64) -> String {
        const KIB: u64 = 1 << 10;
        const MIB: u64 = 1 << 20;
        const GIB: u64 = 1 << 30;
        if bytes >= GIB {
            format!("{:.2} GiB", bytes as f64 / GIB as f64)
        } else if bytes >= MIB {
            format!("{:.2} MiB", bytes as f64 / MIB as f64)
        } else if bytes >= KIB {
            format!("{:.2} KiB", bytes as f64 / KIB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}


// Changelog:
// - v1.1.0: Added format_bytes for buffer and dataset sizes, dropped
//   format_duration which had no remaining caller.
// - v1.0.0: Hashrate and number formatting.
