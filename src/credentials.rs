use std::io::{self, Write};

use tracing::info;

use session::{CredentialProvider, Credentials};

/// Asks on the terminal when a login wall is first met. An empty username
/// means "continue without logging in"; passwords are read without echo
/// and live only for this run.
pub struct TerminalPrompt;

impl CredentialProvider for TerminalPrompt {
    fn request(&self, origin: &str) -> Option<Credentials> {
        println!();
        println!("Login page detected at {}", origin);
        println!("Enter credentials to explore behind it, or press Enter to skip.");

        print!("Username: ");
        io::stdout().flush().ok()?;
        let mut username = String::new();
        io::stdin().read_line(&mut username).ok()?;
        let username = username.trim().to_string();
        if username.is_empty() {
            info!("No username entered; continuing without authentication");
            return None;
        }

        let password = rpassword::prompt_password("Password: ").ok()?;
        Some(Credentials { username, password })
    }
}
