//! Human-readable decision summary.
//!
//! Pure formatting: nothing in the decision path reads the string back, so
//! it can be skipped entirely without changing the commanded rate.

use core::fmt::Write;

use crate::model::PatientState;

/// Adjustments the controller applied on top of the base rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecisionFlags {
    /// Clamped down to the safety ceiling.
    pub safety_limited: bool,
    /// Forecast hydration triggered a preemptive boost.
    pub predictive_boost: bool,
}

/// `H=62.00% E_T=0.71 T=0.01W/kg R=0.18 C_res=0.97 σ=0.95 v=2.22cm/s G(v)=0.00 u=0.62ml/min [PRED_BOOST]`
pub fn format(state: &PatientState, rate_ml_min: f64, flags: DecisionFlags) -> String {
    let mut s = String::with_capacity(128);
    let _ = write!(
        s,
        "H={:.2}% E_T={:.2} T={:.2}W/kg R={:.2} C_res={:.2} \u{03c3}={:.2} v={:.2}cm/s G(v)={:.2} u={:.2}ml/min",
        state.hydration_pct,
        state.energy_t,
        state.energy_t_absolute,
        state.risk_score,
        state.cardiac_reserve,
        state.coherence_sigma,
        state.estimated_flow_velocity_cm_s,
        state.flow_efficiency,
        rate_ml_min,
    );
    if flags.safety_limited {
        s.push_str(" [SAFETY_LIM]");
    }
    if flags.predictive_boost {
        s.push_str(" [PRED_BOOST]");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_every_term_and_flags() {
        let state = PatientState {
            hydration_pct: 62.0,
            energy_t: 0.714,
            coherence_sigma: 0.95,
            ..PatientState::default()
        };
        let text = format(
            &state,
            0.625,
            DecisionFlags {
                safety_limited: true,
                predictive_boost: true,
            },
        );
        assert!(text.starts_with("H=62.00% E_T=0.71 "));
        assert!(text.contains("\u{03c3}=0.95"));
        assert!(text.ends_with("[SAFETY_LIM] [PRED_BOOST]"));
    }

    #[test]
    fn no_flags_no_brackets() {
        let text = format(&PatientState::default(), 0.4, DecisionFlags::default());
        assert!(!text.contains('['));
        assert!(text.ends_with("u=0.40ml/min"));
    }
}
