//! Kernel command line editing.

use alloc::string::String;
use bootcore::{Error, Result};

/// Largest command line, NUL terminator included, handed to the kernel.
pub const MAX_COMMAND_LINE_SIZE: usize = 2048;

/// Replace the value of the first `param` occurrence in `cmdline`.
///
/// `param` includes its separator, e.g. `"console="`; the value runs up to
/// the next space or the end of the line. An empty `param` changes nothing.
/// A longer value that would push the line past [`MAX_COMMAND_LINE_SIZE`]
/// leaves it as is; shrinking or same-size values always apply.
pub fn param_value_override(cmdline: &mut String, param: &str, value: &str) -> Result<()> {
    if param.is_empty() {
        return Ok(());
    }

    let start = cmdline.find(param).ok_or(Error::NotFound)? + param.len();
    let end = cmdline[start..]
        .find(' ')
        .map_or(cmdline.len(), |off| start + off);

    let old_len = end - start;
    if value.len() > old_len && cmdline.len() + (value.len() - old_len) > MAX_COMMAND_LINE_SIZE {
        return Err(Error::Overflow);
    }

    cmdline.replace_range(start..end, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn replaces_value_in_the_middle() {
        let mut c = "root=/dev/sda console=ttyS0,115200n8 quiet".to_string();
        param_value_override(&mut c, "console=", "none").unwrap();
        assert_eq!(c, "root=/dev/sda console=none quiet");
    }

    #[test]
    fn replaces_value_at_the_end_with_longer_text() {
        let mut c = "quiet console=x".to_string();
        param_value_override(&mut c, "console=", "ttyTCU0,115200").unwrap();
        assert_eq!(c, "quiet console=ttyTCU0,115200");
    }

    #[test]
    fn empty_value_is_allowed() {
        let mut c = "console=ttyS0 rw".to_string();
        param_value_override(&mut c, "console=", "").unwrap();
        assert_eq!(c, "console= rw");
    }

    #[test]
    fn empty_param_is_a_no_op() {
        let mut c = "rw".to_string();
        param_value_override(&mut c, "", "none").unwrap();
        assert_eq!(c, "rw");
    }

    #[test]
    fn missing_param_is_not_found() {
        let mut c = "rw quiet".to_string();
        assert_eq!(
            param_value_override(&mut c, "console=", "none"),
            Err(Error::NotFound)
        );
        assert_eq!(c, "rw quiet");
    }

    #[test]
    fn overflow_leaves_line_untouched() {
        let mut c = "console=a ".to_string() + &"x".repeat(2030);
        let before = c.clone();
        let long = "y".repeat(20);
        assert_eq!(
            param_value_override(&mut c, "console=", &long),
            Err(Error::Overflow)
        );
        assert_eq!(c, before);
    }

    #[test]
    fn shorter_value_fits_a_full_line() {
        let mut c = "console=ttyS0,115200n8 ".to_string();
        let pad = MAX_COMMAND_LINE_SIZE - c.len();
        c.push_str(&"x".repeat(pad));
        assert_eq!(c.len(), MAX_COMMAND_LINE_SIZE);

        param_value_override(&mut c, "console=", "none").unwrap();
        assert!(c.starts_with("console=none x"));
        assert_eq!(c.len(), MAX_COMMAND_LINE_SIZE - 10);

        // Growing back by the same amount still fits; one byte more does not.
        param_value_override(&mut c, "console=", "ttyS0,115200n8").unwrap();
        assert_eq!(
            param_value_override(&mut c, "console=", "ttyS0,115200n81"),
            Err(Error::Overflow)
        );
    }
}
