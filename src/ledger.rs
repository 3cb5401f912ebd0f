//! Ecash ledger reconciliation.
//!
//! Tracks pending mint quotes against a persisted balance-by-mint mapping.
//! Balance mutations happen only here, and only when a quote or proof batch
//! is confirmed — each at most once. State lives under
//! `~/.trustline/ledger/ledger.json` (`TRUSTLINE_LEDGER_DIR` overrides).

use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotePurpose {
    /// Mint-in: pay an invoice, receive proofs, balance goes up.
    Deposit,
    /// Melt-out: spend proofs to settle an invoice, balance goes down.
    Withdraw,
}

impl std::fmt::Display for QuotePurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotePurpose::Deposit => f.write_str("deposit"),
            QuotePurpose::Withdraw => f.write_str("withdraw"),
        }
    }
}

/// A pending mint-side operation awaiting settlement confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintQuote {
    pub quote_id: String,
    pub invoice: String,
    pub amount_sats: u64,
    pub mint_url: String,
    pub purpose: QuotePurpose,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl MintQuote {
    #[must_use]
    pub fn new(
        mint_url: &str,
        invoice: &str,
        amount_sats: u64,
        purpose: QuotePurpose,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            quote_id: ulid::Ulid::new().to_string(),
            invoice: invoice.to_string(),
            amount_sats,
            mint_url: mint_url.trim_end_matches('/').to_string(),
            purpose,
            created_at: now,
            expires_at: now + ttl,
        }
    }
}

/// Outcome of a confirmation attempt. Only `Applied` moved any balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Applied { delta_sats: i64 },
    AlreadyProcessed,
    Expired,
}

/// Registry entry for a known mint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintRecord {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub trusted: bool,
}

#[derive(Debug, Deserialize, Default)]
struct MintRegistryFile {
    #[serde(default)]
    mints: Vec<MintRecord>,
}

/// Trusted-mint registry loaded from `mints.toml`. Gates auto-acceptance of
/// proofs; unknown mints are never trusted.
pub struct MintGuard {
    records: HashMap<String, MintRecord>,
}

impl MintGuard {
    #[must_use]
    pub fn load() -> Self {
        let path = std::env::var("TRUSTLINE_MINTS_TOML")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                let mut p = dirs::home_dir()?;
                p.push(".trustline");
                p.push("mints.toml");
                Some(p)
            });

        let file = path
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|data| toml::from_str::<MintRegistryFile>(&data).ok())
            .unwrap_or_default();

        let mut records = HashMap::new();
        for m in file.mints {
            records.insert(m.url.trim_end_matches('/').to_string(), m);
        }
        Self { records }
    }

    #[must_use]
    pub fn from_records(mints: Vec<MintRecord>) -> Self {
        let mut records = HashMap::new();
        for m in mints {
            records.insert(m.url.trim_end_matches('/').to_string(), m);
        }
        Self { records }
    }

    #[must_use]
    pub fn trusted(&self, mint_url: &str) -> bool {
        self.records
            .get(mint_url.trim_end_matches('/'))
            .is_some_and(|m| m.trusted)
    }

    #[must_use]
    pub fn records(&self) -> Vec<&MintRecord> {
        self.records.values().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct LedgerState {
    balances: BTreeMap<String, u64>,
    quotes: Vec<MintQuote>,
    confirmed: BTreeSet<String>,
}

/// File-backed reconciler. All balance movement goes through
/// [`Ledger::confirm_quote`] and [`Ledger::receive_proofs`].
pub struct Ledger {
    state: LedgerState,
    path: PathBuf,
}

impl Ledger {
    /// Open (or initialize) the ledger in its state directory.
    #[allow(clippy::missing_errors_doc)]
    pub fn open() -> Result<Self, LedgerError> {
        let dir = ledger_dir()?;
        let path = dir.join("ledger.json");
        let state = if path.exists() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            LedgerState::default()
        };
        Ok(Self { state, path })
    }

    /// Register a pending quote.
    ///
    /// # Errors
    ///
    /// `DuplicateQuote` when an unexpired quote for the same
    /// (mint, amount, purpose) tuple is already pending.
    pub fn record_pending_quote(&mut self, quote: MintQuote) -> Result<(), LedgerError> {
        let now = Utc::now();
        let dup = self.state.quotes.iter().any(|q| {
            q.mint_url == quote.mint_url
                && q.amount_sats == quote.amount_sats
                && q.purpose == quote.purpose
                && q.expires_at > now
        });
        if dup {
            return Err(LedgerError::DuplicateQuote {
                mint_url: quote.mint_url,
                amount_sats: quote.amount_sats,
                purpose: quote.purpose.to_string(),
            });
        }
        info!(
            "pending {} quote {} at {} for {} sat",
            quote.purpose, quote.quote_id, quote.mint_url, quote.amount_sats
        );
        self.state.quotes.push(quote);
        self.persist()
    }

    /// Apply a quote's balance delta exactly once.
    ///
    /// Re-confirming an applied quote or confirming past expiry is a no-op
    /// reported through [`ConfirmOutcome`], not an error.
    pub fn confirm_quote(
        &mut self,
        quote_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, LedgerError> {
        if self.state.confirmed.contains(quote_id) {
            return Ok(ConfirmOutcome::AlreadyProcessed);
        }
        let idx = self
            .state
            .quotes
            .iter()
            .position(|q| q.quote_id == quote_id)
            .ok_or_else(|| LedgerError::UnknownQuote(quote_id.to_string()))?;
        if self.state.quotes[idx].expires_at <= now {
            return Ok(ConfirmOutcome::Expired);
        }

        let quote = self.state.quotes[idx].clone();
        let balance = self
            .state
            .balances
            .entry(quote.mint_url.clone())
            .or_insert(0);
        let delta_sats = match quote.purpose {
            QuotePurpose::Deposit => {
                *balance += quote.amount_sats;
                i64::try_from(quote.amount_sats).unwrap_or(i64::MAX)
            }
            QuotePurpose::Withdraw => {
                if *balance < quote.amount_sats {
                    return Err(LedgerError::InsufficientFunds {
                        mint_url: quote.mint_url,
                        have: *balance,
                        need: quote.amount_sats,
                    });
                }
                *balance -= quote.amount_sats;
                -i64::try_from(quote.amount_sats).unwrap_or(i64::MAX)
            }
        };
        self.state.quotes.remove(idx);
        self.state.confirmed.insert(quote_id.to_string());
        self.persist()?;
        info!("confirmed quote {quote_id}: {delta_sats} sat at {}", quote.mint_url);
        Ok(ConfirmOutcome::Applied { delta_sats })
    }

    /// Credit proofs received out of band. Auto-accepted only from mints the
    /// registry marks trusted.
    pub fn receive_proofs(
        &mut self,
        guard: &MintGuard,
        mint_url: &str,
        amount_sats: u64,
    ) -> Result<u64, LedgerError> {
        let mint_url = mint_url.trim_end_matches('/');
        if !guard.trusted(mint_url) {
            return Err(LedgerError::UntrustedMint(mint_url.to_string()));
        }
        let balance = self
            .state
            .balances
            .entry(mint_url.to_string())
            .or_insert(0);
        *balance += amount_sats;
        let new_balance = *balance;
        self.persist()?;
        Ok(new_balance)
    }

    /// Drop quotes past their expiry. Expired quotes can never be confirmed.
    pub fn expire_stale(&mut self, now: DateTime<Utc>) -> Result<usize, LedgerError> {
        let before = self.state.quotes.len();
        self.state.quotes.retain(|q| q.expires_at > now);
        let removed = before - self.state.quotes.len();
        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    #[must_use]
    pub fn pending_quotes(&self) -> &[MintQuote] {
        &self.state.quotes
    }

    #[must_use]
    pub fn balance_by_mint(&self) -> &BTreeMap<String, u64> {
        &self.state.balances
    }

    #[must_use]
    pub fn balance_of(&self, mint_url: &str) -> u64 {
        self.state
            .balances
            .get(mint_url.trim_end_matches('/'))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn total_balance(&self) -> u64 {
        self.state.balances.values().sum()
    }

    fn persist(&self) -> Result<(), LedgerError> {
        let data = serde_json::to_vec_pretty(&self.state)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

fn ledger_dir() -> Result<PathBuf, LedgerError> {
    if let Ok(custom) = std::env::var("TRUSTLINE_LEDGER_DIR") {
        let dir = PathBuf::from(custom);
        fs::create_dir_all(&dir)?;
        return Ok(dir);
    }
    let home = dirs::home_dir()
        .ok_or_else(|| LedgerError::Io(std::io::Error::other("no home dir")))?;
    let dir = home.join(".trustline").join("ledger");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
