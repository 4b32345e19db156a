//! Platform shell selection and the Claude launch line.

/// Shell used when the configuration names none.
pub fn default_shell() -> String {
    #[cfg(windows)]
    {
        "powershell.exe".to_string()
    }
    #[cfg(not(windows))]
    {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

/// Login shell on Unix so nvm/homebrew profiles are loaded.
pub fn default_shell_args() -> Vec<String> {
    #[cfg(windows)]
    {
        vec!["-NoLogo".to_string()]
    }
    #[cfg(not(windows))]
    {
        vec!["-l".to_string()]
    }
}

/// Builds `claude [--resume <id>] [--dangerously-skip-permissions]\r`.
///
/// The resume id is single-quoted so it reaches the CLI as one argument.
pub fn claude_launch_command(command: &str, resume: Option<&str>, skip_permissions: bool) -> String {
    let mut line = command.to_string();
    if let Some(id) = resume.map(str::trim).filter(|id| !id.is_empty()) {
        line.push_str(" --resume ");
        line.push_str(&shell_quote(id));
    }
    if skip_permissions {
        line.push_str(" --dangerously-skip-permissions");
    }
    line.push('\r');
    line
}

fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_launch() {
        assert_eq!(claude_launch_command("claude", None, false), "claude\r");
    }

    #[test]
    fn test_launch_flags() {
        assert_eq!(
            claude_launch_command("claude", Some("abc-123"), true),
            "claude --resume 'abc-123' --dangerously-skip-permissions\r"
        );
        assert_eq!(claude_launch_command("claude", Some("  "), false), "claude\r");
    }

    #[test]
    fn test_resume_id_is_quoted() {
        assert_eq!(
            claude_launch_command("claude", Some("a'b; rm"), false),
            "claude --resume 'a'\\''b; rm'\r"
        );
    }

    #[test]
    fn test_default_shell_not_empty() {
        assert!(!default_shell().is_empty());
    }
}
