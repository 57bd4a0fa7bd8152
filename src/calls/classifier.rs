//! 通话结果分类：把状态文本、摘要、逐字稿映射到 CallStatus
//!
//! 按表的顺序逐条匹配，第一条命中的状态胜出；都不命中时看是否含有成功类词语，否则为 Error。

use regex::{Regex, RegexBuilder};

use crate::calls::CallStatus;

pub trait OutcomeClassifier: Send + Sync {
    fn classify(&self, text: &str) -> CallStatus;
}

/// 默认的有序模式表
pub const DEFAULT_PATTERNS: &[(CallStatus, &[&str])] = &[
    (
        CallStatus::Completed,
        &[
            r"successfully.*reserv",
            r"booked.*table",
            r"confirmed.*appointment",
            r"reservation.*confirmed",
            r"appointment.*scheduled",
            r"cancelled.*successfully",
        ],
    ),
    (
        CallStatus::NoAvailability,
        &[
            r"no.*availability",
            r"fully.*booked",
            r"no.*slots",
            r"no.*tables",
            r"booked.*up",
            r"unavailable",
        ],
    ),
    (
        CallStatus::NoAnswer,
        &[
            r"no.*answer",
            r"busy.*signal",
            r"not.*picked.*up",
            r"ringing.*no.*answer",
        ],
    ),
    (
        CallStatus::Voicemail,
        &[
            r"voicemail",
            r"voice.*mail",
            r"left.*message",
            r"recorded.*message",
        ],
    ),
    (
        CallStatus::IvrBlocked,
        &[
            r"ivr",
            r"automated.*system",
            r"press.*1",
            r"menu.*options",
            r"automated.*menu",
            r"cannot.*connect.*to.*human",
        ],
    ),
    (
        CallStatus::NeedsUserInput,
        &[
            r"need.*more.*information",
            r"missing.*details",
            r"require.*confirmation",
            r"need.*to.*speak.*to.*user",
            r"insufficient.*information",
        ],
    ),
    (
        CallStatus::Timeout,
        &[
            r"timeout",
            r"call.*ended",
            r"maximum.*duration",
            r"call.*limit",
        ],
    ),
];

const SUCCESS_WORDS: &[&str] = &["success", "complete", "done", "finished"];

/// 基于正则表的分类器
pub struct PatternClassifier {
    table: Vec<(CallStatus, Vec<Regex>)>,
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self::from_table(DEFAULT_PATTERNS)
    }

    /// 用自定义表构建；无法编译的模式记录告警后跳过
    pub fn from_table(table: &[(CallStatus, &[&str])]) -> Self {
        let table = table
            .iter()
            .map(|(status, patterns)| {
                let compiled = patterns
                    .iter()
                    .filter_map(|p| {
                        RegexBuilder::new(p)
                            .case_insensitive(true)
                            .dot_matches_new_line(true)
                            .build()
                            .inspect_err(|e| tracing::warn!(pattern = %p, error = %e, "Skipping bad pattern"))
                            .ok()
                    })
                    .collect();
                (*status, compiled)
            })
            .collect();
        Self { table }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeClassifier for PatternClassifier {
    fn classify(&self, text: &str) -> CallStatus {
        for (status, patterns) in &self.table {
            if patterns.iter().any(|re| re.is_match(text)) {
                return *status;
            }
        }
        let lower = text.to_lowercase();
        if SUCCESS_WORDS.iter().any(|w| lower.contains(w)) {
            CallStatus::Completed
        } else {
            CallStatus::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_decides() {
        let c = PatternClassifier::new();
        // 同时命中 completed 与 no_answer：completed 在前
        assert_eq!(
            c.classify("Booked a table after the first try got no answer"),
            CallStatus::Completed
        );
        assert_eq!(
            c.classify("They are fully booked tonight"),
            CallStatus::NoAvailability
        );
        assert_eq!(c.classify("Went straight to VOICEMAIL"), CallStatus::Voicemail);
        assert_eq!(
            c.classify("Stuck in an automated menu"),
            CallStatus::IvrBlocked
        );
        assert_eq!(
            c.classify("Restaurant said they need more information"),
            CallStatus::NeedsUserInput
        );
        assert_eq!(c.classify("maximum duration reached"), CallStatus::Timeout);
    }

    #[test]
    fn test_fallback_words() {
        let c = PatternClassifier::new();
        assert_eq!(c.classify("done"), CallStatus::Completed);
        assert_eq!(c.classify("Task finished"), CallStatus::Completed);
        assert_eq!(c.classify("something odd happened"), CallStatus::Error);
        assert_eq!(c.classify(""), CallStatus::Error);
    }

    #[test]
    fn test_custom_table() {
        let c = PatternClassifier::from_table(&[(CallStatus::NoAnswer, &["nobody", "(unclosed"])]);
        assert_eq!(c.classify("nobody home"), CallStatus::NoAnswer);
        assert_eq!(c.classify("table booked"), CallStatus::Error);
    }
}
