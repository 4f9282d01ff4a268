/// Risk scoring engine.
///
/// Pure reduction over the accumulated findings: a per-finding score from
/// severity, exploitability, supply-chain drift, and LLM confidence, and an
/// aggregate run score with critical/high bonuses. Both land in [0, 100],
/// rounded to two decimals.

use crate::core::state::Vulnerability;
use crate::core::Severity;

pub struct ScoringEngine {
    exploit_weight: f64,
    drift_weight: f64,
    llm_weight: f64,
}

impl ScoringEngine {
    pub fn new() -> Self {
        Self {
            exploit_weight: 1.5,
            drift_weight: 0.2,
            llm_weight: 0.2,
        }
    }

    pub fn severity_weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => 10.0,
            Severity::High => 7.5,
            Severity::Medium => 5.0,
            Severity::Low => 2.5,
            Severity::Info => 1.0,
            Severity::Unknown => 1.0,
        }
    }

    /// Per-finding score:
    /// `base(severity) * exploitCoeff * (1 + drift*0.2) * llmConfidence`,
    /// where llmConfidence maps a [0,1] confidence into [0.8, 1.0] and is
    /// 1.0 when the finding carries none. Capped at 100.
    pub fn risk_score(&self, vuln: &Vulnerability, supply_chain_drift: Option<f64>) -> f64 {
        let base = self.severity_weight(vuln.severity);

        let exploit_coeff = if vuln.exploitable {
            self.exploit_weight
        } else {
            1.0
        };

        let drift_factor = match supply_chain_drift {
            Some(drift) => 1.0 + drift * self.drift_weight,
            None => 1.0,
        };

        let llm_confidence = match vuln.llm_confidence {
            Some(confidence) => 0.8 + confidence * self.llm_weight,
            None => 1.0,
        };

        let score = base * exploit_coeff * drift_factor * llm_confidence;
        round2(score.min(100.0))
    }

    /// Aggregate score: mean of the per-finding scores plus 5.0 per critical
    /// and 2.0 per high finding (by severity label, not numeric score).
    /// 0.0 when there are no findings.
    pub fn overall_risk_score(&self, vulns: &[Vulnerability]) -> f64 {
        if vulns.is_empty() {
            return 0.0;
        }

        let mut total = 0.0;
        let mut critical_count = 0usize;
        let mut high_count = 0usize;

        for vuln in vulns {
            total += vuln.risk_score;
            match vuln.severity {
                Severity::Critical => critical_count += 1,
                Severity::High => high_count += 1,
                _ => {}
            }
        }

        let avg = total / vulns.len() as f64;
        let overall = avg + critical_count as f64 * 5.0 + high_count as f64 * 2.0;
        round2(overall.min(100.0))
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(severity: Severity) -> Vulnerability {
        Vulnerability::new("finding", severity, "host.example.com")
    }

    #[test]
    fn test_critical_exploitable_scores_15() {
        let engine = ScoringEngine::new();
        let mut vuln = finding(Severity::Critical);
        vuln.exploitable = true;

        assert_eq!(engine.risk_score(&vuln, None), 15.0);
    }

    #[test]
    fn test_high_with_drift_and_llm_confidence() {
        let engine = ScoringEngine::new();
        let mut vuln = finding(Severity::High);
        vuln.llm_confidence = Some(0.9);

        // 7.5 * 1.0 * 1.1 * 0.98 = 8.085 -> rounds half-up to 8.09
        assert_eq!(engine.risk_score(&vuln, Some(0.5)), 8.09);
    }

    #[test]
    fn test_score_clamped_to_100() {
        let engine = ScoringEngine::new();
        let mut vuln = finding(Severity::Critical);
        vuln.exploitable = true;

        // 10 * 1.5 * (1 + 30*0.2) = 105 before the cap
        assert_eq!(engine.risk_score(&vuln, Some(30.0)), 100.0);
    }

    #[test]
    fn test_unknown_and_info_share_floor_weight() {
        let engine = ScoringEngine::new();
        assert_eq!(engine.risk_score(&finding(Severity::Unknown), None), 1.0);
        assert_eq!(engine.risk_score(&finding(Severity::Info), None), 1.0);
    }

    #[test]
    fn test_llm_confidence_bounds() {
        let engine = ScoringEngine::new();

        let mut vuln = finding(Severity::Medium);
        vuln.llm_confidence = Some(0.0);
        assert_eq!(engine.risk_score(&vuln, None), 4.0);

        vuln.llm_confidence = Some(1.0);
        assert_eq!(engine.risk_score(&vuln, None), 5.0);
    }

    #[test]
    fn test_overall_empty_is_zero() {
        let engine = ScoringEngine::new();
        assert_eq!(engine.overall_risk_score(&[]), 0.0);
    }

    #[test]
    fn test_overall_mean_without_bonuses() {
        let engine = ScoringEngine::new();
        let mut a = finding(Severity::Medium);
        a.risk_score = 10.0;
        let mut b = finding(Severity::Medium);
        b.risk_score = 20.0;

        assert_eq!(engine.overall_risk_score(&[a, b]), 15.0);
    }

    #[test]
    fn test_overall_applies_severity_bonuses() {
        let engine = ScoringEngine::new();
        let mut critical = finding(Severity::Critical);
        critical.risk_score = 15.0;
        let mut high = finding(Severity::High);
        high.risk_score = 7.5;

        // mean 11.25 + 5.0 (critical) + 2.0 (high)
        assert_eq!(engine.overall_risk_score(&[critical, high]), 18.25);
    }

    #[test]
    fn test_overall_clamped_to_100() {
        let engine = ScoringEngine::new();
        let vulns: Vec<_> = (0..30)
            .map(|_| {
                let mut v = finding(Severity::Critical);
                v.risk_score = 15.0;
                v
            })
            .collect();

        // mean 15.0 + 30*5.0 = 165 before the cap
        assert_eq!(engine.overall_risk_score(&vulns), 100.0);
    }
}
