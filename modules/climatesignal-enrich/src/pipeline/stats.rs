use crate::stages::dedup::DedupStats;
use crate::stages::geo::GeoStats;
use crate::stages::language::LanguageStats;
use crate::stages::sentiment::SentimentStats;
use crate::stages::text::TextStats;
use crate::stages::validate::ValidatorStats;
use crate::stages::weather::WeatherStats;

/// Record counts at the pipeline edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub lines_read: u64,
    pub completed: u64,
    pub dropped: u64,
    pub dead_lettered: u64,
}

/// Stats from an enrichment run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub totals: RunTotals,
    pub validator: ValidatorStats,
    pub dedup: DedupStats,
    pub text: TextStats,
    pub language: LanguageStats,
    pub geo: GeoStats,
    pub weather: Option<WeatherStats>,
    pub sentiment: SentimentStats,
}

fn pct(part: u64, total: u64) -> f64 {
    part as f64 / total.max(1) as f64 * 100.0
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = &self.totals;
        writeln!(f, "\n=== Enrichment Run Complete ===")?;
        writeln!(f, "Lines read:         {}", t.lines_read)?;
        writeln!(f, "Records completed:  {}", t.completed)?;
        writeln!(f, "Duplicates dropped: {}", t.dropped)?;
        writeln!(f, "Dead-lettered:      {}", t.dead_lettered)?;

        writeln!(f, "\nValidation:")?;
        writeln!(f, "  Rejected: {}", self.validator.rejected)?;

        writeln!(f, "\nDedup:")?;
        writeln!(f, "  Reposts:         {}", self.dedup.reposts)?;
        writeln!(f, "  Duplicate ids:   {}", self.dedup.duplicate_ids)?;
        writeln!(f, "  Duplicate texts: {}", self.dedup.duplicate_texts)?;
        writeln!(
            f,
            "  Cache sizes:     {} ids, {} fingerprints",
            self.dedup.id_cache_len, self.dedup.fingerprint_cache_len
        )?;

        writeln!(f, "\nText:")?;
        writeln!(f, "  Failed:     {}", self.text.failed)?;
        writeln!(f, "  With emoji: {}", self.text.with_emoji)?;

        let l = &self.language;
        writeln!(f, "\nLanguage:")?;
        writeln!(f, "  Short text: {}", l.short_text)?;
        writeln!(f, "  Primary:    {} ({:.0}%)", l.primary, pct(l.primary, l.processed))?;
        writeln!(f, "  Secondary:  {}", l.secondary)?;
        writeln!(f, "  Fallback:   {}", l.fallback)?;

        let g = &self.geo;
        writeln!(f, "\nGeo:")?;
        writeln!(f, "  High:        {} ({:.0}%)", g.high, pct(g.high, g.processed))?;
        writeln!(f, "  Medium:      {} ({:.0}%)", g.medium, pct(g.medium, g.processed))?;
        writeln!(f, "  Low:         {} ({:.0}%)", g.low, pct(g.low, g.processed))?;
        writeln!(f, "  Unavailable: {}", g.unavailable)?;
        if g.geocode_api_calls > 0 || g.geocode_cache_hits > 0 {
            writeln!(
                f,
                "  Geocoder:    {} calls, {} cache hits",
                g.geocode_api_calls, g.geocode_cache_hits
            )?;
        }

        match &self.weather {
            Some(w) => {
                writeln!(f, "\nWeather:")?;
                writeln!(f, "  Matched:         {} ({:.0}%)", w.matched(), pct(w.matched(), w.processed))?;
                writeln!(f, "  No observations: {}", w.no_observations)?;
                writeln!(f, "  No station:      {}", w.no_station)?;
                writeln!(f, "  No geolocation:  {}", w.no_geolocation)?;
                writeln!(
                    f,
                    "  Stations:        {} calls, {} cache hits",
                    w.station_api_calls, w.station_cache_hits
                )?;
            }
            None => writeln!(f, "\nWeather: not configured")?,
        }

        let s = &self.sentiment;
        writeln!(f, "\nSentiment:")?;
        writeln!(f, "  Positive: {}", s.positive)?;
        writeln!(f, "  Neutral:  {}", s.neutral)?;
        writeln!(f, "  Negative: {}", s.negative)?;
        writeln!(
            f,
            "  Methods:  {} model, {} lexicon, {} unavailable",
            s.model, s.lexicon, s.unavailable
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        RunReport {
            totals: RunTotals {
                lines_read: 4,
                completed: 2,
                dropped: 1,
                dead_lettered: 1,
            },
            validator: ValidatorStats::default(),
            dedup: DedupStats::default(),
            text: TextStats::default(),
            language: LanguageStats::default(),
            geo: GeoStats {
                processed: 2,
                high: 1,
                unavailable: 1,
                ..Default::default()
            },
            weather: None,
            sentiment: SentimentStats::default(),
        }
    }

    #[test]
    fn display_includes_totals_and_percentages() {
        let text = report().to_string();
        assert!(text.contains("Records completed:  2"));
        assert!(text.contains("High:        1 (50%)"));
        assert!(text.contains("Weather: not configured"));
        assert!(!text.contains("Geocoder:"));
    }

    #[test]
    fn pct_of_zero_total_is_zero() {
        assert_eq!(pct(0, 0), 0.0);
    }
}
