//! Job input parameters: the game concept a pipeline run turns into a package.
//!
//! A `GameIdea` is immutable after initialization — every stage reads it, none
//! write it. The CLI loads one from a JSON file; tests build them inline.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Volatility class of the game's math model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Volatility {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Volatility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Volatility::Low => write!(f, "low"),
            Volatility::Medium => write!(f, "medium"),
            Volatility::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Volatility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Volatility::Low),
            "medium" => Ok(Volatility::Medium),
            "high" => Ok(Volatility::High),
            _ => anyhow::bail!("Invalid volatility '{}'. Valid values: low, medium, high", s),
        }
    }
}

/// The game concept driving one pipeline job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameIdea {
    /// Theme line, e.g. "Norse mythology under a blood moon".
    pub theme: String,

    /// Art direction brief, e.g. "painterly, high-contrast".
    #[serde(default)]
    pub art_style: String,

    #[serde(default)]
    pub volatility: Volatility,

    /// Target return-to-player, percent.
    #[serde(default = "default_target_rtp")]
    pub target_rtp: f64,

    /// Maximum win, as a multiple of total bet.
    #[serde(default = "default_max_win")]
    pub max_win_multiplier: f64,

    #[serde(default = "default_grid_cols")]
    pub grid_cols: u32,

    #[serde(default = "default_grid_rows")]
    pub grid_rows: u32,

    /// Win-evaluation scheme, e.g. "243 ways" or "20 lines".
    #[serde(default = "default_ways_or_lines")]
    pub ways_or_lines: String,

    /// Requested feature identifiers in snake_case, e.g. "free_spins".
    #[serde(default)]
    pub requested_features: Vec<String>,

    /// Target regulatory markets, e.g. "Georgia", "Texas".
    #[serde(default)]
    pub target_markets: Vec<String>,

    /// Competitor titles the research stage should tear down.
    #[serde(default)]
    pub competitor_references: Vec<String>,
}

fn default_target_rtp() -> f64 {
    96.0
}

fn default_max_win() -> f64 {
    5000.0
}

fn default_grid_cols() -> u32 {
    5
}

fn default_grid_rows() -> u32 {
    3
}

fn default_ways_or_lines() -> String {
    "243 ways".to_string()
}

impl GameIdea {
    /// Create an idea with just a theme; everything else defaulted.
    pub fn new(theme: &str) -> Self {
        Self {
            theme: theme.to_string(),
            art_style: String::new(),
            volatility: Volatility::default(),
            target_rtp: default_target_rtp(),
            max_win_multiplier: default_max_win(),
            grid_cols: default_grid_cols(),
            grid_rows: default_grid_rows(),
            ways_or_lines: default_ways_or_lines(),
            requested_features: Vec::new(),
            target_markets: Vec::new(),
            competitor_references: Vec::new(),
        }
    }

    /// Load an idea from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read idea file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse idea file: {}", path.display()))
    }

    /// Directory-safe slug for the job's output tree: lowercased theme with
    /// non-alphanumerics collapsed to `_`, capped at 40 chars, plus a
    /// timestamp suffix so repeated runs of the same theme never collide.
    pub fn slug(&self) -> String {
        self.slug_at(chrono::Local::now())
    }

    fn slug_at(&self, now: chrono::DateTime<chrono::Local>) -> String {
        let base: String = self
            .theme
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .take(40)
            .collect();
        format!("{}_{}", base, now.format("%Y%m%d_%H%M%S"))
    }

    /// Grid shorthand, e.g. `5x3`.
    pub fn grid(&self) -> String {
        format!("{}x{}", self.grid_cols, self.grid_rows)
    }

    /// Feature names rendered for humans: `hold_and_spin` → `Hold And Spin`.
    pub fn features_pretty(&self) -> Vec<String> {
        self.requested_features
            .iter()
            .map(|f| {
                f.split('_')
                    .map(|w| {
                        let mut chars = w.chars();
                        match chars.next() {
                            Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                            None => String::new(),
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_idea_new_defaults() {
        let idea = GameIdea::new("Ancient Egypt");
        assert_eq!(idea.theme, "Ancient Egypt");
        assert_eq!(idea.volatility, Volatility::Medium);
        assert_eq!(idea.target_rtp, 96.0);
        assert_eq!(idea.grid_cols, 5);
        assert_eq!(idea.grid_rows, 3);
        assert!(idea.requested_features.is_empty());
    }

    #[test]
    fn test_deserialize_minimal_json_applies_defaults() {
        let idea: GameIdea = serde_json::from_str(r#"{"theme": "Deep Sea"}"#).unwrap();
        assert_eq!(idea.theme, "Deep Sea");
        assert_eq!(idea.ways_or_lines, "243 ways");
        assert_eq!(idea.max_win_multiplier, 5000.0);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut idea = GameIdea::new("Dragon Hoard");
        idea.volatility = Volatility::High;
        idea.requested_features = vec!["free_spins".into(), "hold_and_spin".into()];
        idea.target_markets = vec!["Georgia".into(), "Texas".into()];

        let json = serde_json::to_string(&idea).unwrap();
        let back: GameIdea = serde_json::from_str(&json).unwrap();
        assert_eq!(back.theme, "Dragon Hoard");
        assert_eq!(back.volatility, Volatility::High);
        assert_eq!(back.target_markets.len(), 2);
    }

    #[test]
    fn test_volatility_serializes_lowercase() {
        let json = serde_json::to_string(&Volatility::High).unwrap();
        assert_eq!(json, r#""high""#);
        let back: Volatility = serde_json::from_str(r#""low""#).unwrap();
        assert_eq!(back, Volatility::Low);
    }

    #[test]
    fn test_volatility_from_str_rejects_unknown() {
        assert!("extreme".parse::<Volatility>().is_err());
        assert_eq!("HIGH".parse::<Volatility>().unwrap(), Volatility::High);
    }

    #[test]
    fn test_slug_replaces_special_chars() {
        let idea = GameIdea::new("Pharaoh's Gold: Reborn!");
        let ts = chrono::Local::now();
        let slug = idea.slug_at(ts);
        assert!(slug.starts_with("pharaoh_s_gold__reborn_"));
        assert!(!slug.contains(' '));
        assert!(!slug.contains('\''));
    }

    #[test]
    fn test_slug_caps_base_at_forty_chars() {
        let idea = GameIdea::new(&"x".repeat(200));
        let slug = idea.slug();
        // base (40) + '_' + "YYYYmmdd_HHMMSS" (15)
        assert_eq!(slug.len(), 40 + 1 + 15);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idea.json");
        std::fs::write(
            &path,
            r#"{"theme": "Wild West", "volatility": "high", "target_markets": ["Nevada"]}"#,
        )
        .unwrap();

        let idea = GameIdea::load(&path).unwrap();
        assert_eq!(idea.theme, "Wild West");
        assert_eq!(idea.volatility, Volatility::High);
        assert_eq!(idea.target_markets, vec!["Nevada"]);
    }

    #[test]
    fn test_load_missing_file_errors() {
        let dir = tempdir().unwrap();
        let result = GameIdea::load(&dir.path().join("nope.json"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Failed to read"));
    }

    #[test]
    fn test_features_pretty() {
        let mut idea = GameIdea::new("t");
        idea.requested_features = vec!["free_spins".into(), "hold_and_spin".into()];
        assert_eq!(idea.features_pretty(), vec!["Free Spins", "Hold And Spin"]);
    }
}
