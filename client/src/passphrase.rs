//! Passphrase acquisition for local key decryption.
//!
//! Environment variables win; an interactive prompt is the fallback. The
//! retriever is injected wherever keys are decrypted, so tests and
//! embedding applications can substitute their own source.

use std::io::{BufRead, Write};

use zeroize::Zeroizing;

use provenant_tuf::data::RoleName;
use provenant_tuf::error::{Result, TufError};
use provenant_tuf::signer::PassphraseRetriever;

/// Environment variable consulted for a role's passphrase, e.g.
/// `PROVENANT_ROOT_PASSPHRASE`.
pub fn env_var_for(role: RoleName) -> String {
    format!("PROVENANT_{}_PASSPHRASE", role.to_string().to_uppercase())
}

/// Reads `PROVENANT_<ROLE>_PASSPHRASE`, prompting on stdin when unset.
pub struct EnvPassphrase {
    /// When false, a missing variable is an error instead of a prompt.
    interactive: bool,
}

impl EnvPassphrase {
    pub fn new(interactive: bool) -> Self {
        EnvPassphrase { interactive }
    }

    fn prompt(role: RoleName) -> Result<Zeroizing<String>> {
        eprint!("Enter passphrase for {} key: ", role);
        std::io::stderr().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        let trimmed = line.trim_end_matches(['\r', '\n']).to_string();
        if trimmed.is_empty() {
            return Err(TufError::PassphraseInvalid(role.to_string()));
        }
        Ok(Zeroizing::new(trimmed))
    }
}

impl PassphraseRetriever for EnvPassphrase {
    fn passphrase(&self, role: RoleName, _gun: &str) -> Result<Zeroizing<String>> {
        match std::env::var(env_var_for(role)) {
            Ok(value) if !value.is_empty() => Ok(Zeroizing::new(value)),
            _ if self.interactive => Self::prompt(role),
            _ => Err(TufError::PassphraseInvalid(format!(
                "{} not set and prompting disabled",
                env_var_for(role)
            ))),
        }
    }
}
