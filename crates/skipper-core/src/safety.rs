//! Denylist filter for destructive shell commands.
//!
//! Best-effort: false negatives are acceptable, false positives block
//! execution and surface as a recorded "blocked" step, never as an error.

/// Destructive command fragments, matched case-insensitively against the
/// trimmed command. Each entry carries the reason reported on the blocked
/// step.
const DENYLIST: &[(&str, &str)] = &[
    ("rm -rf /", "recursive delete of the filesystem root"),
    ("rm -fr /", "recursive delete of the filesystem root"),
    ("rm -rf /*", "recursive delete of the filesystem root"),
    ("rm -rf ~", "recursive delete of the home directory"),
    ("rm -rf $home", "recursive delete of the home directory"),
    ("mkfs", "filesystem formatting"),
    ("dd if=/dev/zero", "raw disk overwrite with dd"),
    ("dd of=/dev/", "raw disk write with dd"),
    ("> /dev/sd", "raw disk redirection"),
    ("> /dev/nvme", "raw disk redirection"),
    (":(){", "fork bomb"),
    (":(){:|:&};:", "fork bomb"),
    ("chmod -r 777 /", "recursive world-writable permissions from root"),
    ("format c:", "disk format"),
    ("del /f /s /q c:\\", "recursive system-drive delete"),
    ("rd /s /q c:\\", "recursive system-drive delete"),
    ("fdisk", "partition table modification"),
    ("parted", "partition table modification"),
    ("wipefs", "filesystem signature wipe"),
    ("shutdown", "system shutdown"),
    ("poweroff", "system shutdown"),
    ("reboot", "system reboot"),
    ("init 0", "system shutdown"),
    ("init 6", "system reboot"),
];

/// Why a command is considered dangerous, or `None` if it is allowed.
pub fn dangerous_reason(command: &str) -> Option<&'static str> {
    let normalized = command.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }
    DENYLIST
        .iter()
        .find(|(pattern, _)| matches_pattern(&normalized, pattern))
        .map(|(_, reason)| *reason)
}

/// Substring containment, except that patterns targeting the bare root
/// (ending in ` /`) must stop at a path boundary so `rm -rf /tmp/cache`
/// is not caught by `rm -rf /`.
fn matches_pattern(command: &str, pattern: &str) -> bool {
    if !pattern.ends_with(" /") {
        return command.contains(pattern);
    }
    let mut search = command;
    let mut base = 0;
    while let Some(pos) = search.find(pattern) {
        let end = base + pos + pattern.len();
        match command[end..].chars().next() {
            None | Some(' ') | Some('*') | Some(';') => return true,
            _ => {
                base += pos + pattern.len();
                search = &command[base..];
            }
        }
    }
    false
}

/// Whether the command matches the denylist.
pub fn is_dangerous(command: &str) -> bool {
    dangerous_reason(command).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_root_wipe() {
        assert!(is_dangerous("rm -rf /"));
        assert!(is_dangerous("  sudo rm -rf / "));
        assert!(is_dangerous("RM -RF /"));
    }

    #[test]
    fn test_blocks_disk_operations() {
        assert!(is_dangerous("mkfs.ext4 /dev/sda1"));
        assert!(is_dangerous("dd of=/dev/sda bs=1M"));
        assert!(is_dangerous("echo x > /dev/sda"));
    }

    #[test]
    fn test_blocks_power_commands() {
        assert!(is_dangerous("shutdown -h now"));
        assert!(is_dangerous("reboot"));
        assert_eq!(dangerous_reason("reboot"), Some("system reboot"));
    }

    #[test]
    fn test_allows_ordinary_commands() {
        assert!(!is_dangerous("ls -la"));
        assert!(!is_dangerous("rm build/output.log"));
        assert!(!is_dangerous("df -h"));
        assert!(!is_dangerous("cat /etc/os-release"));
        assert!(!is_dangerous(""));
    }

    #[test]
    fn test_allows_scoped_recursive_delete() {
        assert!(!is_dangerous("rm -rf ./target"));
        assert!(!is_dangerous("rm -rf /tmp/build-cache"));
    }
}
