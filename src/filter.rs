//! Web-of-trust content filter.
//!
//! One mutable instance per process, constructed by the caller and handed to
//! whoever filters content streams. The preference can be persisted to
//! `~/.trustline/config.toml` (`TRUSTLINE_CONFIG_PATH` overrides).

use crate::scorer::{TrustIndicator, TrustLevel};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterLevel {
    /// No threshold; everything non-muted passes.
    #[default]
    All,
    Extended,
    FriendOfFriend,
    Trusted,
}

impl FilterLevel {
    fn min_rank(self) -> u8 {
        match self {
            FilterLevel::All => 0,
            FilterLevel::Extended => TrustLevel::Extended.rank(),
            FilterLevel::FriendOfFriend => TrustLevel::FriendOfFriend.rank(),
            FilterLevel::Trusted => TrustLevel::Trusted.rank(),
        }
    }
}

impl std::str::FromStr for FilterLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(FilterLevel::All),
            "extended" => Ok(FilterLevel::Extended),
            "friend-of-friend" | "fof" => Ok(FilterLevel::FriendOfFriend),
            "trusted" => Ok(FilterLevel::Trusted),
            other => Err(anyhow!("unknown filter level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WotFilter {
    #[serde(default)]
    filter_level: FilterLevel,
    #[serde(default)]
    show_unknown: bool,
}

impl WotFilter {
    #[must_use]
    pub fn new(filter_level: FilterLevel, show_unknown: bool) -> Self {
        Self {
            filter_level,
            show_unknown,
        }
    }

    #[must_use]
    pub fn filter_level(&self) -> FilterLevel {
        self.filter_level
    }

    #[must_use]
    pub fn show_unknown(&self) -> bool {
        self.show_unknown
    }

    pub fn set_filter_level(&mut self, level: FilterLevel) {
        self.filter_level = level;
    }

    pub fn toggle_show_unknown(&mut self) -> bool {
        self.show_unknown = !self.show_unknown;
        self.show_unknown
    }

    /// Whether content from an actor with this indicator should be shown.
    /// Muted never passes. Unknown passes below threshold only when
    /// `show_unknown` is set.
    #[must_use]
    pub fn passes(&self, indicator: &TrustIndicator) -> bool {
        if indicator.level == TrustLevel::Muted {
            return false;
        }
        if self.filter_level == FilterLevel::All {
            return true;
        }
        if indicator.level.rank() >= self.filter_level.min_rank() {
            return true;
        }
        self.show_unknown && indicator.level == TrustLevel::Unknown
    }

    /// Load the persisted preference, falling back to defaults when the
    /// config file is absent or unreadable.
    #[must_use]
    pub fn load() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        fs::read_to_string(&path)
            .ok()
            .and_then(|data| toml::from_str(&data).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path().ok_or_else(|| anyhow!("no home dir"))?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let data = toml::to_string_pretty(self)?;
        fs::write(&path, data).with_context(|| format!("writing {}", path.display()))
    }
}

fn config_path() -> Option<PathBuf> {
    if let Ok(custom) = std::env::var("TRUSTLINE_CONFIG_PATH") {
        return Some(PathBuf::from(custom));
    }
    let mut p = dirs::home_dir()?;
    p.push(".trustline");
    p.push("config.toml");
    Some(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::{
        SCORE_EXTENDED, SCORE_FOF_BASE, SCORE_MUTED, SCORE_TRUSTED, SCORE_UNKNOWN,
    };

    fn indicator(level: TrustLevel) -> TrustIndicator {
        let score = match level {
            TrustLevel::Own => 100,
            TrustLevel::Trusted => SCORE_TRUSTED,
            TrustLevel::FriendOfFriend => SCORE_FOF_BASE,
            TrustLevel::Extended => SCORE_EXTENDED,
            TrustLevel::Unknown => SCORE_UNKNOWN,
            TrustLevel::Muted => SCORE_MUTED,
        };
        TrustIndicator {
            level,
            score,
            label: "",
            color: "",
        }
    }

    #[test]
    fn all_passes_everything_but_muted() {
        for show_unknown in [false, true] {
            let f = WotFilter::new(FilterLevel::All, show_unknown);
            for level in [
                TrustLevel::Own,
                TrustLevel::Trusted,
                TrustLevel::FriendOfFriend,
                TrustLevel::Extended,
                TrustLevel::Unknown,
            ] {
                assert!(f.passes(&indicator(level)), "{level:?} should pass");
            }
            assert!(!f.passes(&indicator(TrustLevel::Muted)));
        }
    }

    #[test]
    fn threshold_excludes_lower_tiers() {
        let f = WotFilter::new(FilterLevel::FriendOfFriend, false);
        assert!(f.passes(&indicator(TrustLevel::Trusted)));
        assert!(f.passes(&indicator(TrustLevel::FriendOfFriend)));
        assert!(!f.passes(&indicator(TrustLevel::Extended)));
        assert!(!f.passes(&indicator(TrustLevel::Unknown)));
    }

    #[test]
    fn show_unknown_readmits_only_unknown() {
        let f = WotFilter::new(FilterLevel::Trusted, true);
        assert!(f.passes(&indicator(TrustLevel::Unknown)));
        assert!(!f.passes(&indicator(TrustLevel::Extended)));
        assert!(!f.passes(&indicator(TrustLevel::Muted)));
    }

    #[test]
    fn toggle_flips_flag() {
        let mut f = WotFilter::default();
        assert!(f.toggle_show_unknown());
        assert!(!f.toggle_show_unknown());
    }
}
