//! Readers for `/proc/<pid>/stat` and `/proc/<pid>/status`.

/// Raw counters of one process at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcSample {
    /// User plus system CPU time in clock ticks.
    pub cpu_ticks: u64,
    pub rss_kb: u64,
    /// High-water mark of the resident set.
    pub hwm_kb: u64,
}

/// Sum of `utime` and `stime` from a `stat` line.
pub fn parse_stat(content: &str) -> Option<u64> {
    // `comm` may contain spaces and parentheses; fields resume after the last `)`.
    let rest = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // rest starts at field 3 (state); utime and stime are fields 14 and 15.
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// `VmRSS` and `VmHWM` in kB from a `status` file.
pub fn parse_status(content: &str) -> (u64, u64) {
    let field = |name: &str| {
        content
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|v| v.split_whitespace().next())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
    };
    let rss = field("VmRSS:");
    let hwm = field("VmHWM:").max(rss);
    (rss, hwm)
}

/// Read both files; `None` once the process is gone.
pub fn read(pid: u32) -> Option<ProcSample> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    let cpu_ticks = parse_stat(&stat)?;
    let (rss_kb, hwm_kb) = parse_status(&status);
    Some(ProcSample {
        cpu_ticks,
        rss_kb,
        hwm_kb,
    })
}

/// Kernel clock ticks per second.
pub fn clock_ticks_per_sec() -> f64 {
    #[cfg(unix)]
    {
        use nix::unistd::{sysconf, SysconfVar};
        if let Ok(Some(ticks)) = sysconf(SysconfVar::CLK_TCK) {
            if ticks > 0 {
                return ticks as f64;
            }
        }
    }
    100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stat_with_spaces_in_comm() {
        let line = "1234 (my (odd) proc) S 1 1234 1234 0 -1 4194304 100 0 0 0 250 50 0 0 20 0 1 0 100 1000 200";
        assert_eq!(parse_stat(line), Some(300));
        assert_eq!(parse_stat("garbage"), None);
    }

    #[test]
    fn test_parse_status() {
        let status = "Name:\tpython3\nVmHWM:\t   20480 kB\nVmRSS:\t   10240 kB\n";
        assert_eq!(parse_status(status), (10240, 20480));
        assert_eq!(parse_status("Name:\tzombie\n"), (0, 0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_read_self() {
        let sample = read(std::process::id()).unwrap();
        assert!(sample.rss_kb > 0);
        assert!(sample.hwm_kb >= sample.rss_kb);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_clock_ticks_from_sysconf() {
        // USER_HZ is 100 on every mainstream Linux build.
        assert_eq!(clock_ticks_per_sec(), 100.0);
    }
}
