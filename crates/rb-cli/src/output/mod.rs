//! Terminal output helpers

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

use rb_gateway::SESSION_COOKIE;

/// Status endpoint payload as seen by the CLI
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SessionStatus {
    pub alive: bool,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Render a status endpoint answer for the terminal
pub fn format_session_status(status: &SessionStatus) -> String {
    if !status.alive {
        return "Session: not alive".to_string();
    }

    let mut output = String::from("Session: alive\n");
    if let Some(name) = &status.name {
        output.push_str(&format!("Remote: {}\n", name));
    }
    if let Some(kind) = &status.kind {
        output.push_str(&format!("Type: {}\n", kind));
    }
    output
}

/// `remoteId=<id>` cookie line for a session
pub fn session_cookie(id: &str) -> String {
    format!("{}={}", SESSION_COOKIE, id)
}

fn print_tagged(stderr: bool, color: Color, tag: &str, msg: &str) {
    if stderr {
        let _ = crossterm::execute!(
            std::io::stderr(),
            SetForegroundColor(color),
            Print(tag),
            ResetColor,
            Print(msg),
            Print("\n")
        );
    } else {
        let _ = crossterm::execute!(
            std::io::stdout(),
            SetForegroundColor(color),
            Print(tag),
            ResetColor,
            Print(msg),
            Print("\n")
        );
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_tagged(false, Color::Green, "✓ ", msg);
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    print_tagged(true, Color::Red, "✗ ", msg);
}

/// Print a warning in yellow to stderr
pub fn print_warning(msg: &str) {
    print_tagged(true, Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_tagged(false, Color::Cyan, "ℹ ", msg);
}
