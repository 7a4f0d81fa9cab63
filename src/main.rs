//! Minimal demo binary exercising the vault engine end to end.
//!
//! A real CLI (argument parsing, prompts, clipboard integration) is
//! expected to be a thin shell built on top of the `pass_cli_core`
//! library; this binary only proves the library wires together.

use std::io::{self, Write};

use pass_cli_core::audit::AuditKeySource;
use pass_cli_core::secure_types::OptionalSecret;
use pass_cli_core::vault::{CallerContext, Credential, Vault};
use pass_cli_core::{PassCliError, Result};

fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn main() {
    pass_cli_core::logging::init_from_config().ok();

    if let Err(e) = run() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let vault_path = pass_cli_core::config::get_config().general.default_vault.clone();

    match args.get(1).map(String::as_str) {
        Some("init") => {
            let password = prompt("master password: ")?;
            let vault = Vault::init(&vault_path, &password, AuditKeySource::Derived { salt: rand::random() })?;
            println!("vault created at {}", vault.path().display());
        }
        Some("add") => {
            let service = args.get(2).cloned().ok_or_else(|| PassCliError::from("usage: add <service>"))?;
            let password = prompt("master password: ")?;
            let vault = Vault::open(&vault_path)?;
            vault.unlock(&password)?;

            let username = prompt("username: ")?;
            let credential_password = prompt("credential password: ")?;
            let now = chrono::Utc::now();
            vault.add_credential(Credential {
                service: service.clone(),
                username,
                password: credential_password.into(),
                url: None,
                notes: None,
                category: None,
                created_at: now,
                updated_at: now,
                totp_secret: OptionalSecret::none(),
                usage_records: Vec::new(),
            })?;
            println!("added '{}'", service);
        }
        Some("get") => {
            let service = args.get(2).cloned().ok_or_else(|| PassCliError::from("usage: get <service>"))?;
            let password = prompt("master password: ")?;
            let vault = Vault::open(&vault_path)?;
            vault.unlock(&password)?;
            let context = CallerContext {
                path: "pass-cli-demo".to_string(),
                field: Some("password".to_string()),
                ..Default::default()
            };
            let credential = vault.get_credential(&service, context)?;
            println!("username: {}", credential.username);
        }
        Some("list") => {
            let password = prompt("master password: ")?;
            let vault = Vault::open(&vault_path)?;
            vault.unlock(&password)?;
            for service in vault.list_credentials()? {
                println!("{}", service);
            }
        }
        _ => {
            eprintln!("usage: pass-cli-demo <init|add|get|list> [service]");
            std::process::exit(2);
        }
    }

    Ok(())
}
