use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "tokenvault",
    about = "Encrypted local storage for auth tokens and session data",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print version and exit.
    Version,
    /// Round-trip a sample value through the keyring and the encrypted store.
    Health,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the decrypted value stored under a key.
    Get { key: String },
    /// Encrypt and store a value under a key.
    Set { key: String, value: String },
    /// Remove a value and its encryption key.
    Remove { key: String },
    /// Remove all stored auth tokens, session and user data.
    Logout,
    /// Copy entries from the legacy keyring layout into the encrypted store.
    Migrate,
    /// Delete legacy keyring entries once migration has completed.
    Cleanup,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
