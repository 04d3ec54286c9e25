//! Deterministic offline studio.
//!
//! Produces plausible, fixed-shape documents for every label the pipeline
//! asks for, keyed on [`StudioRequest::label`]. Used when no external
//! generator command is configured, and by tests that need the pipeline to
//! run end to end with stable content.

use anyhow::Result;
use serde_json::json;

use super::{Studio, StudioRequest};

pub struct TemplateStudio;

impl TemplateStudio {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TemplateStudio {
    fn default() -> Self {
        Self::new()
    }
}

impl Studio for TemplateStudio {
    fn generate(&self, request: &StudioRequest) -> Result<String> {
        let subject = if request.subject.is_empty() {
            "the game"
        } else {
            &request.subject
        };
        let text = match request.label.as_str() {
            "trend_radar" => trend_radar(subject),
            "jurisdiction_constraints" => jurisdiction_constraints(),
            "patent_scan" => patent_scan(subject),
            "market_recon" => market_recon(subject),
            "market_sweep" => market_sweep(subject),
            "competitor_deep_dive" => competitor_deep_dive(subject),
            "market_report" => market_report(subject),
            "gdd" => gdd(subject),
            "math_model" => math_model(subject),
            "simulation" => simulation(),
            "player_behavior" => player_behavior(),
            "mood_boards" => mood_boards(subject),
            "art_direction" => art_direction(subject),
            "audio_brief" => audio_brief(subject),
            "compliance_report" => compliance_report(),
            "certification_plan" => certification_plan(),
            "adversarial_review" => adversarial_review(subject),
            "prototype" => prototype(subject),
            _ => generic(subject, &request.label),
        };
        Ok(text)
    }
}

fn pretty(value: serde_json::Value) -> String {
    // json! output is always serializable
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}

fn trend_radar(subject: &str) -> String {
    pretty(json!({
        "generated_for": subject,
        "rising_themes": ["mythology remix", "cozy collecting", "retro arcade"],
        "rising_mechanics": ["cascading wins", "symbol collection meters", "bonus buy"],
        "cooling_themes": ["generic fruit", "plain egyptian"],
        "confidence": "template"
    }))
}

fn jurisdiction_constraints() -> String {
    pretty(json!({
        "per_market": {
            "UK": { "max_autoplay": 0, "feature_buy_allowed": false },
            "Malta": { "max_autoplay": 100, "feature_buy_allowed": true }
        },
        "intersection": {
            "blockers": [],
            "restricted_features": ["bonus_buy"],
            "notes": "Feature buy must be toggleable per market."
        }
    }))
}

fn patent_scan(subject: &str) -> String {
    pretty(json!({
        "scope": subject,
        "risk_level": "low",
        "flagged_mechanics": [],
        "cleared_mechanics": ["free_spins", "expanding_wilds", "multiplier_wilds"],
        "notes": "No live grants matched the requested feature set."
    }))
}

fn market_recon(market: &str) -> String {
    pretty(json!({
        "market": market,
        "regulator": "template-registry",
        "top_performing_volatility": "medium-high",
        "dominant_grid": "5x3",
        "notes": "Recon snapshot produced offline."
    }))
}

fn market_sweep(subject: &str) -> String {
    format!(
        "# Market Sweep: {subject}\n\n\
         Ten comparable releases from the last two years were surveyed.\n\
         The theme space is active but not saturated; the strongest performers\n\
         pair the theme with a collection mechanic and medium-high volatility.\n"
    )
}

fn competitor_deep_dive(subject: &str) -> String {
    format!(
        "# Competitor Deep Dive: {subject}\n\n\
         ## Closest Competitor\n\
         A 5x3, 243-ways title with free spins and a 96.1% RTP dominates the\n\
         niche. Session data suggests players churn after the base game loop.\n\n\
         ## Gap\n\
         None of the surveyed titles combine the theme with a persistent\n\
         collection meter, which is the clearest differentiation lever.\n"
    )
}

fn market_report(subject: &str) -> String {
    format!(
        "# Market Research Report: {subject}\n\n\
         ## Competitive Landscape\n\
         The surveyed field clusters around familiar mechanics; production\n\
         values, not mechanics, separate the top decile.\n\n\
         ## Player Preferences\n\
         Target players favour medium-high volatility, visible progress\n\
         meters, and free-spin variants with retriggers.\n\n\
         ## Differentiation Opportunities\n\
         1. Persistent collection meter across sessions.\n\
         2. Theme-native bonus stages rather than generic wheels.\n\n\
         ## Recommendation\n\
         Proceed with the requested parameters; bias art budget toward the\n\
         bonus stage where differentiation is most visible.\n"
    )
}

fn gdd(subject: &str) -> String {
    format!(
        "# Game Design Document: {subject}\n\n\
         ## Overview\n\
         A 5x3 video slot themed around {subject}, built for medium-high\n\
         volatility play with a persistent collection meter.\n\n\
         ## Symbols\n\
         - 4 premium thematic symbols\n\
         - 4 royals (A, K, Q, J)\n\
         - Wild (substitutes all except scatter)\n\
         - Scatter (triggers free spins)\n\n\
         ## Features\n\
         - Free spins: 3+ scatters award 10 spins with a progressive multiplier\n\
         - Collection meter: premium wins fill a meter that upgrades wilds\n\
         - Retrigger: 2+ scatters during free spins add 5 spins\n\n\
         ## Bonus Stage\n\
         Filling the meter three times opens a pick bonus with cash values\n\
         scaled to total bet.\n\n\
         ## Sound Direction\n\
         Layered ambient base loop with stingers on meter progress.\n"
    )
}

fn math_model(subject: &str) -> String {
    format!(
        "# Math Model: {subject}\n\n\
         ## Model Summary\n\
         Base game contributes the majority of RTP with free spins carrying\n\
         the volatility tail. Reel strips were balanced against the paytable\n\
         to hold hit frequency near 27%.\n\n\
         ## RTP Allocation\n\
         - Base game: 58.4%\n\
         - Free spins: 37.6%\n\n\
         ## Verification\n\
         A 10M-spin simulation landed within one tenth of a point of target;\n\
         see simulation_results.json for the run output.\n"
    )
}

fn simulation() -> String {
    pretty(json!({
        "optimized_rtp": 96.02,
        "target_rtp": 96.0,
        "hit_frequency": 0.271,
        "volatility_index": 8.2,
        "max_win_multiplier_hit": 4875.0,
        "spins_simulated": 10_000_000,
        "rtp_breakdown": {
            "base_game": 58.4,
            "free_spins": 37.62
        }
    }))
}

fn player_behavior() -> String {
    pretty(json!({
        "median_session_minutes": 14,
        "bet_level_distribution": { "min": 0.35, "median": 0.22, "max": 0.43 },
        "bonus_reach_rate": 0.18,
        "retention_risk": "moderate",
        "notes": "Meter progress visibility is the main session extender."
    }))
}

fn mood_boards(subject: &str) -> String {
    format!(
        "# Mood Boards: {subject}\n\n\
         ## Board 1 — Saturated Dusk\n\
         Warm oranges against deep violet; high contrast on premium symbols.\n\n\
         ## Board 2 — Weathered Field\n\
         Muted earth palette, textured parchment UI, low-key lighting.\n\n\
         ## Board 3 — Night Neon\n\
         Dark base with neon accent lines; modern arcade energy.\n\n\
         Recommendation: Board 1 for primary direction, Board 3 for the\n\
         bonus stage.\n"
    )
}

fn art_direction(subject: &str) -> String {
    format!(
        "# Art Direction: {subject}\n\n\
         ## Palette\n\
         Primary warm oranges and golds over deep violet shadows.\n\n\
         ## Symbol Treatment\n\
         Premium symbols rendered with rim light and heavy silhouette reads;\n\
         royals flat-shaded to keep hierarchy obvious at reel speed.\n\n\
         ## Background\n\
         Base game at dusk, free spins shift to night with the same set.\n\n\
         ## UI\n\
         Meter anchored bottom-center; win presentation keeps the reels\n\
         visible at all times.\n"
    )
}

fn audio_brief(subject: &str) -> String {
    format!(
        "# Audio Design Brief: {subject}\n\n\
         ## Base Loop\n\
         90s ambient bed, 72 BPM, light percussion entering on any win.\n\n\
         ## Stingers\n\
         - Meter progress: rising three-note motif\n\
         - Scatter land: low impact with tail\n\
         - Free spins: full theme statement, double tempo\n\n\
         ## Effects List\n\
         spin_start, reel_stop_1..5, win_small, win_big, meter_tick,\n\
         bonus_open, bonus_pick, bonus_close\n"
    )
}

fn compliance_report() -> String {
    pretty(json!({
        "status": "review_required",
        "jurisdictions_evaluated": ["UK", "Malta", "Ontario"],
        "findings": [
            { "severity": "minor", "item": "Feature buy must be disabled for UK builds." },
            { "severity": "info", "item": "Session reality checks required in Ontario." }
        ],
        "rng_requirements": "Certified RNG per GLI-11",
        "responsible_gaming": ["reality_check", "loss_limits", "session_timer"]
    }))
}

fn certification_plan() -> String {
    pretty(json!({
        "test_labs": ["GLI", "BMM"],
        "standards": ["GLI-11", "GLI-19"],
        "submission_artifacts": ["math_model", "rng_integration", "game_rules"],
        "estimated_weeks": 8
    }))
}

fn adversarial_review(subject: &str) -> String {
    format!(
        "# Adversarial Review: {subject}\n\n\
         ## Strongest Objections\n\
         1. The collection meter risks reading as decoration if fill pacing\n\
            is slower than one upgrade per typical session.\n\
         2. RTP allocation leans on free spins; dry base-game stretches may\n\
            exceed player tolerance at the stated hit frequency.\n\n\
         ## What Would Change My Mind\n\
         Behavioral sim output showing meter completion inside the median\n\
         session, and a base-game anticipation feature filling dead spins.\n"
    )
}

fn prototype(subject: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{subject} — prototype</title></head>\n\
         <body style=\"background:#1a1026;color:#f5d67b;font-family:sans-serif;text-align:center\">\n\
         <h1>{subject}</h1>\n\
         <p>Static reel mock. Spin logic is intentionally out of scope.</p>\n\
         <pre id=\"reels\">A  K  W  Q  S\nJ  W  A  K  Q\nQ  A  S  J  K</pre>\n\
         </body>\n</html>\n"
    )
}

fn generic(subject: &str, label: &str) -> String {
    format!(
        "# {label}: {subject}\n\n\
         Offline template output for an unrecognized request label.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(label: &str) -> StudioRequest {
        StudioRequest::new("test", label).with_subject("gold rush")
    }

    #[test]
    fn test_market_report_has_sections_and_subject() {
        let out = TemplateStudio::new().generate(&request("market_report")).unwrap();
        assert!(out.contains("gold rush"));
        assert!(out.contains("## Competitive Landscape"));
        assert!(out.contains("## Recommendation"));
        assert!(out.len() > 100);
    }

    #[test]
    fn test_simulation_is_valid_json_with_rtp() {
        let out = TemplateStudio::new().generate(&request("simulation")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["optimized_rtp"], 96.02);
        assert!(value["rtp_breakdown"]["base_game"].is_number());
    }

    #[test]
    fn test_jurisdiction_constraints_shape() {
        let out = TemplateStudio::new()
            .generate(&request("jurisdiction_constraints"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(value["intersection"]["blockers"].is_array());
    }

    #[test]
    fn test_unknown_label_falls_back() {
        let out = TemplateStudio::new().generate(&request("weather_forecast")).unwrap();
        assert!(out.contains("weather_forecast"));
        assert!(out.contains("gold rush"));
    }

    #[test]
    fn test_output_is_deterministic() {
        let studio = TemplateStudio::new();
        let a = studio.generate(&request("gdd")).unwrap();
        let b = studio.generate(&request("gdd")).unwrap();
        assert_eq!(a, b);
    }
}
