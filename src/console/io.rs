//! Console input/output with a process-wide colorless switch.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use once_cell::sync::Lazy;
use regex::Regex;

/// When set, ANSI escape sequences are stripped from everything printed.
static COLORLESS: Lazy<AtomicBool> = Lazy::new(|| AtomicBool::new(false));

static ANSI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]").expect("ANSI pattern is valid"));

pub struct IO;

impl IO {
    pub fn initialize(colorless: bool) {
        COLORLESS.store(colorless, Ordering::Relaxed);
        if colorless {
            colored::control::set_override(false);
        }
    }

    fn render(text: &str) -> String {
        if COLORLESS.load(Ordering::Relaxed) {
            ANSI_RE.replace_all(text, "").into_owned()
        } else {
            text.to_string()
        }
    }

    pub fn print(text: &str) {
        println!("{}", Self::render(text));
    }

    pub fn ok(msg: &str) {
        Self::print(&format!("{}  {}", "[+]".bright_green(), msg));
    }

    pub fn warn(msg: &str) {
        Self::print(&format!("{}  {}", "[~]".bright_yellow(), msg));
    }

    pub fn error(msg: &str) {
        Self::print(&format!("{}  {}", "[!]".bright_red(), msg));
    }

    pub fn spacer() {
        println!();
    }

    /// Prompts and reads one line. `None` means EOF (Ctrl-D) or a broken
    /// stdin; callers treat it as a quit request.
    pub fn input(prompt: &str) -> Option<String> {
        print!("{}", Self::render(prompt));
        io::stdout().flush().ok()?;

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_string()),
            Err(_) => None,
        }
    }

    /// ANSI clear-screen plus cursor home.
    pub fn clear() {
        print!("\x1b[2J\x1b[1;1H");
        let _ = io::stdout().flush();
    }
}
