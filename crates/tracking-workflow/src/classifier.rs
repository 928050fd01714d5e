//! 优先级分类
//!
//! 根据结果的解释代码（interpretation）判断紧急程度

use tracking_core::{Priority, ResultRecord};

/// 危急代码：危急高、危急低、危急异常
const CRITICAL_CODES: &[&str] = &["HH", "LL", "AA"];

/// 一般异常代码
const ABNORMAL_CODES: &[&str] = &["H", "L", "A", "HU", "LU"];

/// 对单个解释代码分类，未知代码归为常规
pub fn classify(code: Option<&str>) -> Priority {
    let Some(code) = code else {
        return Priority::Routine;
    };

    let normalized = code.trim().to_ascii_uppercase();
    if CRITICAL_CODES.contains(&normalized.as_str()) {
        Priority::Critical
    } else if ABNORMAL_CODES.contains(&normalized.as_str()) {
        Priority::High
    } else {
        if !normalized.is_empty() && normalized != "N" {
            tracing::debug!("Unrecognized interpretation code '{}', treating as routine", code);
        }
        Priority::Routine
    }
}

/// 对整条结果分类
///
/// 先检查危急代码，再检查一般异常（异常代码或数值超出参考范围），否则为常规。
pub fn classify_result(result: &ResultRecord) -> Priority {
    let by_code = result
        .interpretation_codes
        .iter()
        .map(|code| classify(Some(code)))
        .max()
        .unwrap_or(Priority::Routine);

    if by_code == Priority::Critical {
        return Priority::Critical;
    }

    if by_code == Priority::High || result.value_out_of_range() {
        return Priority::High;
    }

    Priority::Routine
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracking_core::{Quantity, ReferenceRange, ResultKind};

    #[test]
    fn test_classify_codes() {
        assert_eq!(classify(Some("HH")), Priority::Critical);
        assert_eq!(classify(Some("LL")), Priority::Critical);
        assert_eq!(classify(Some("AA")), Priority::Critical);
        assert_eq!(classify(Some("H")), Priority::High);
        assert_eq!(classify(Some(" l ")), Priority::High);
        assert_eq!(classify(Some("A")), Priority::High);
        assert_eq!(classify(Some("N")), Priority::Routine);
        assert_eq!(classify(Some("XYZ")), Priority::Routine);
        assert_eq!(classify(Some("")), Priority::Routine);
        assert_eq!(classify(None), Priority::Routine);
    }

    #[test]
    fn test_most_severe_code_wins() {
        let mut result = ResultRecord::new("obs-1", ResultKind::Observation, "Patient/p1");
        result.interpretation_codes = vec!["H".to_string(), "HH".to_string(), "N".to_string()];
        assert_eq!(classify_result(&result), Priority::Critical);
    }

    #[test]
    fn test_out_of_range_value_is_high() {
        let mut result = ResultRecord::new("obs-2", ResultKind::Observation, "Patient/p1");
        result.value = Some(Quantity { value: 6.2, unit: Some("mmol/L".to_string()) });
        result.reference_range = Some(ReferenceRange { low: Some(3.5), high: Some(5.1) });
        assert_eq!(classify_result(&result), Priority::High);

        result.value = Some(Quantity { value: 4.0, unit: None });
        assert_eq!(classify_result(&result), Priority::Routine);
    }

    #[test]
    fn test_no_signal_is_routine() {
        let result = ResultRecord::new("obs-3", ResultKind::DiagnosticReport, "Patient/p1");
        assert_eq!(classify_result(&result), Priority::Routine);
    }
}
