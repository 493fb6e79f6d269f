// Shell and interpreter injection screens
//
// Sub-process tools substitute user-controlled values into an argv built
// from templates. When the command being run is shell-like (or is itself an
// interpreter), substituted values get an extra character screen keyed by
// the quote context of the insertion point, plus interpreter-specific token
// screens. These checks run on the raw value before substitution.

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;

use crate::errors::GatewayError;

// Commands whose argv is (or may be re-parsed as) a shell/interpreter
// command line. Matching is by basename, case-insensitive, after stripping
// a ".exe" suffix (any ".exe" binary is treated as shell-like outright).
static SHELL_LIKE: Lazy<HashSet<&'static str>> = Lazy::new(|| {
	[
		"sh", "bash", "zsh", "dash", "ksh", "fish", "csh", "tcsh", "cmd", "cmd.exe",
		"powershell", "pwsh", "busybox", "expect", "git", "perl", "ruby", "node", "deno",
		"lua", "php", "awk", "sed", "make", "timeout", "nice", "nohup", "env", "xargs",
		"ssh", "scp", "sftp", "curl", "wget", "ftp", "nc", "ncat", "socat", "telnet",
		"rsync", "zip", "unzip", "nmap", "tcpdump",
	]
	.into_iter()
	.collect()
});

// Commands that take a URL and perform network I/O; URLs substituted into
// their arguments additionally go through the safe-URL validator.
static NETWORK_TOOLS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
	[
		"curl", "wget", "ftp", "nc", "ncat", "socat", "telnet", "ssh", "scp", "sftp",
		"rsync", "nmap",
	]
	.into_iter()
	.collect()
});

const UNQUOTED_FORBIDDEN: &[char] = &[
	';', '&', '|', '$', '`', '<', '>', '(', ')', '{', '}', '\n', '\r', '\0', '\\', '"',
];

const DOUBLE_QUOTED_FORBIDDEN: &[char] = &['"', '$', '`', '\\'];

/// Quote context of a template placeholder inside an argument template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteContext {
	Unquoted,
	SingleQuoted,
	DoubleQuoted,
}

fn basename(command: &str) -> String {
	let name = Path::new(command)
		.file_name()
		.map(|n| n.to_string_lossy().to_string())
		.unwrap_or_else(|| command.to_string());
	name.to_ascii_lowercase()
}

/// Whether the command warrants the shell-injection character screen.
pub fn is_shell_like(command: &str) -> bool {
	let name = basename(command);
	if name.ends_with(".exe") {
		return true;
	}
	if SHELL_LIKE.contains(name.as_str()) {
		return true;
	}
	// python, python3, python3.12, ...
	if let Some(rest) = name.strip_prefix("python") {
		return rest.is_empty() || rest.chars().all(|c| c.is_ascii_digit() || c == '.');
	}
	false
}

/// Whether the command is a network tool whose URL arguments must be
/// screened through the safe-URL validator.
pub fn is_network_tool(command: &str) -> bool {
	let name = basename(command);
	NETWORK_TOOLS.contains(name.trim_end_matches(".exe"))
}

/// Determine the quote context at byte offset `idx` of an argument
/// template by scanning the quoting state up to that point.
pub fn quote_context_at(template: &str, idx: usize) -> QuoteContext {
	let mut in_single = false;
	let mut in_double = false;
	let mut escaped = false;
	for (i, ch) in template.char_indices() {
		if i >= idx {
			break;
		}
		if escaped {
			escaped = false;
			continue;
		}
		match ch {
			'\\' if !in_single => escaped = true,
			'\'' if !in_double => in_single = !in_single,
			'"' if !in_single => in_double = !in_double,
			_ => {},
		}
	}
	if in_single {
		QuoteContext::SingleQuoted
	} else if in_double {
		QuoteContext::DoubleQuoted
	} else {
		QuoteContext::Unquoted
	}
}

/// Character screen for a value substituted into a shell-like command's
/// argument, keyed by the quote context of the insertion point.
pub fn check_shell_injection(value: &str, ctx: QuoteContext) -> Result<(), GatewayError> {
	let violation = match ctx {
		QuoteContext::Unquoted => value
			.chars()
			.any(|c| c.is_whitespace() || UNQUOTED_FORBIDDEN.contains(&c)),
		QuoteContext::SingleQuoted => value.contains('\''),
		QuoteContext::DoubleQuoted => value.chars().any(|c| DOUBLE_QUOTED_FORBIDDEN.contains(&c)),
	};
	if violation {
		return Err(GatewayError::ShellInjection);
	}
	Ok(())
}

/// A substituted argument may never contain `=`: it would turn into a
/// variable assignment for make/awk/env style hosts (`CC=sh`, `var=val`).
pub fn check_argument_assignment(value: &str) -> Result<(), GatewayError> {
	if value.contains('=') {
		return Err(GatewayError::ArgumentInjection);
	}
	Ok(())
}

/// Interpreter-specific token screen. Currently perl is the only host with
/// dangerous bareword forms that survive the character screens.
pub fn check_interpreter_injection(command: &str, value: &str) -> Result<(), GatewayError> {
	if basename(command).trim_end_matches(".exe") != "perl" {
		return Ok(());
	}
	let lower = value.to_ascii_lowercase();
	let has_piped_open = lower.contains("open(") && value.contains('|');
	if lower.contains("exec")
		|| lower.contains("system")
		|| has_piped_open
		|| value.contains('`')
		|| value.contains("@{[")
		|| lower.contains("eval")
	{
		return Err(GatewayError::InterpreterInjection);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use assert_matches::assert_matches;

	#[test]
	fn test_shell_like_detection() {
		assert!(is_shell_like("bash"));
		assert!(is_shell_like("/bin/sh"));
		assert!(is_shell_like("/usr/bin/python3.12"));
		assert!(is_shell_like("python"));
		assert!(is_shell_like("C:/tools/anything.exe"));
		assert!(is_shell_like("git"));
		assert!(is_shell_like("curl"));
		assert!(!is_shell_like("/usr/local/bin/jq"));
		assert!(!is_shell_like("pythonic-tool"));
	}

	#[test]
	fn test_network_tool_detection() {
		assert!(is_network_tool("curl"));
		assert!(is_network_tool("/usr/bin/wget"));
		assert!(!is_network_tool("bash"));
		assert!(!is_network_tool("jq"));
	}

	#[test]
	fn test_unquoted_screen() {
		assert!(check_shell_injection("hello", QuoteContext::Unquoted).is_ok());
		assert!(check_shell_injection("v1.2.3-rc", QuoteContext::Unquoted).is_ok());
		for v in [
			"hello; rm -rf /",
			"a|b",
			"a&b",
			"$(whoami)",
			"`id`",
			"a>b",
			"a<b",
			"a(b)",
			"{a}",
			"line\nbreak",
			"back\\slash",
			"with space",
			"quo\"te",
		] {
			assert_matches!(
				check_shell_injection(v, QuoteContext::Unquoted),
				Err(GatewayError::ShellInjection),
				"{v}"
			);
		}
	}

	#[test]
	fn test_single_quoted_screen() {
		// Inside single quotes only the closing quote can break out.
		assert!(check_shell_injection("hello; world $HOME", QuoteContext::SingleQuoted).is_ok());
		assert_matches!(
			check_shell_injection("it's", QuoteContext::SingleQuoted),
			Err(GatewayError::ShellInjection)
		);
	}

	#[test]
	fn test_double_quoted_screen() {
		assert!(check_shell_injection("hello; world", QuoteContext::DoubleQuoted).is_ok());
		for v in ["$HOME", "`id`", "a\"b", "a\\b"] {
			assert_matches!(
				check_shell_injection(v, QuoteContext::DoubleQuoted),
				Err(GatewayError::ShellInjection),
				"{v}"
			);
		}
	}

	#[test]
	fn test_quote_context_scan() {
		let tpl = "echo '{{a}}' \"{{b}}\" {{c}}";
		let a = tpl.find("{{a}}").unwrap();
		let b = tpl.find("{{b}}").unwrap();
		let c = tpl.find("{{c}}").unwrap();
		assert_eq!(quote_context_at(tpl, a), QuoteContext::SingleQuoted);
		assert_eq!(quote_context_at(tpl, b), QuoteContext::DoubleQuoted);
		assert_eq!(quote_context_at(tpl, c), QuoteContext::Unquoted);
	}

	#[test]
	fn test_assignment_screen() {
		assert!(check_argument_assignment("plain").is_ok());
		assert_matches!(
			check_argument_assignment("CC=sh"),
			Err(GatewayError::ArgumentInjection)
		);
		assert_matches!(
			check_argument_assignment("a=b"),
			Err(GatewayError::ArgumentInjection)
		);
	}

	#[test]
	fn test_perl_interpreter_screen() {
		assert!(check_interpreter_injection("perl", "plain-text").is_ok());
		for v in [
			"exec('/bin/sh')",
			"system(ls)",
			"open(FH, \"|cat\")",
			"`id`",
			"@{[ die ]}",
			"eval { 1 }",
		] {
			assert_matches!(
				check_interpreter_injection("perl", v),
				Err(GatewayError::InterpreterInjection),
				"{v}"
			);
		}
		// Other hosts are not subject to the perl token screen.
		assert!(check_interpreter_injection("bash", "eval x").is_ok());
	}
}
