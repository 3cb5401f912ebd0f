//! Local actor identity.
//!
//! The signing key lives at `~/.trustline/actor.key` (JSON, base64 secret,
//! 0600 perms) and is generated on first use. The actor id exposed to the
//! rest of the engine is the 64-char lowercase hex public key.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::graph::ActorId;
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use dirs::home_dir;
use ed25519_dalek::{Keypair, PublicKey, SecretKey};
use getrandom::getrandom;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

#[derive(Serialize, Deserialize)]
struct ActorKeyFile {
    alg: String,
    secret: String,
    #[serde(default)]
    pubkey: Option<String>,
}

/// Resolve the local actor id, generating a key on first use.
#[allow(clippy::missing_errors_doc)]
pub fn resolve_own_actor() -> Result<ActorId> {
    if let Some(env_actor) = env::var("TRUSTLINE_ACTOR").ok().and_then(non_empty_trimmed) {
        return ActorId::parse(&env_actor).map_err(|e| anyhow!("{e}"));
    }
    let kp = load_actor_keypair()?;
    ActorId::parse(&hex::encode(kp.public.as_bytes())).map_err(|e| anyhow!("{e}"))
}

/// Load the local signing keypair, generating and persisting one if the key
/// file does not exist yet.
#[allow(clippy::missing_errors_doc)]
pub fn load_actor_keypair() -> Result<Keypair> {
    let path = actor_key_path()?;
    if !path.exists() {
        let key_dir = path
            .parent()
            .ok_or_else(|| anyhow!("invalid actor key path"))?;
        if !key_dir.exists() {
            fs::create_dir_all(key_dir)
                .with_context(|| format!("creating {}", key_dir.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(0o700);
                fs::set_permissions(key_dir, perms)
                    .with_context(|| format!("setting permissions on {}", key_dir.display()))?;
            }
        }
        let secret = generate_secret()?;
        let public = PublicKey::from(&secret);
        let file = ActorKeyFile {
            alg: "ed25519".into(),
            secret: general_purpose::STANDARD.encode(secret.as_bytes()),
            pubkey: Some(hex::encode(public.as_bytes())),
        };
        write_actor_key(&path, &file)?;
        return Ok(Keypair { secret, public });
    }

    let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let file: ActorKeyFile =
        serde_json::from_slice(&bytes).map_err(|e| anyhow!("bad actor.key json: {e}"))?;
    if file.alg.to_lowercase() != "ed25519" {
        return Err(anyhow!("unsupported actor key algorithm: {}", file.alg));
    }
    let secret_bytes = general_purpose::STANDARD
        .decode(file.secret.as_bytes())
        .map_err(|e| anyhow!("invalid actor key encoding: {e}"))?;
    let secret =
        SecretKey::from_bytes(&secret_bytes).map_err(|e| anyhow!("invalid actor secret: {e}"))?;
    let public = PublicKey::from(&secret);
    Ok(Keypair { secret, public })
}

fn write_actor_key(path: &Path, key: &ActorKeyFile) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perms)
            .with_context(|| format!("setting permissions on {}", path.display()))?;
    }

    let data = serde_json::to_vec_pretty(key)?;
    file.write_all(&data)
        .with_context(|| format!("writing {}", path.display()))?;

    Ok(())
}

fn actor_key_path() -> Result<PathBuf> {
    if let Some(p) = env::var("TRUSTLINE_ACTOR_KEY_PATH")
        .ok()
        .and_then(non_empty_trimmed)
    {
        if let Some(stripped) = p.strip_prefix("~/") {
            let mut home =
                home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
            home.push(stripped);
            return Ok(home);
        }
        return Ok(PathBuf::from(p));
    }
    let mut dir = home_dir().ok_or_else(|| anyhow!("unable to determine home directory"))?;
    dir.push(".trustline");
    dir.push("actor.key");
    Ok(dir)
}

fn generate_secret() -> Result<SecretKey> {
    let mut seed = [0u8; 32];
    getrandom(&mut seed).map_err(|e| anyhow!("getrandom error: {e}"))?;
    let secret = SecretKey::from_bytes(&seed).map_err(|e| anyhow!("secret key error: {e}"))?;
    seed.zeroize();
    Ok(secret)
}

fn non_empty_trimmed<S: Into<String>>(input: S) -> Option<String> {
    let s = input.into().trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_id_from_public_key_is_valid_hex() {
        let mut seed = [0u8; 32];
        seed[0] = 1;
        let secret = SecretKey::from_bytes(&seed).unwrap();
        let public = PublicKey::from(&secret);
        let actor = ActorId::parse(&hex::encode(public.as_bytes()));
        assert!(actor.is_ok());
        assert_eq!(actor.unwrap().as_str().len(), 64);
    }

    #[test]
    fn test_non_empty_trimmed() {
        assert_eq!(non_empty_trimmed(" test "), Some("test".into()));
        assert_eq!(non_empty_trimmed(""), None);
    }
}
