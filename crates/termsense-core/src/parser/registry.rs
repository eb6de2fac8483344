//! Parser registry: holds the three parser families and dispatches
//! detection.
//!
//! Dispatch policy:
//! - state: every parser runs, highest confidence wins, ties go to the
//!   earlier (higher-priority) parser;
//! - output: every parser whose `can_parse` gate passes runs, highest
//!   confidence wins;
//! - confirm: first positive detection wins and the winning parser is
//!   remembered so the response bytes come from the parser that understood
//!   the dialog.
//!
//! A parser that panics counts as a non-match; a malformed parser must
//! never take down a tick.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use super::{
    ConfirmInfo, ConfirmParser, OutputParser, ParserContext, SemanticOutput, StateDetection,
    StateParser,
};

/// A confirm detection together with the parser that produced it.
#[derive(Clone)]
pub struct ConfirmHit {
    /// The detected dialog
    pub info: ConfirmInfo,
    /// The parser that detected it, used later to format the response
    pub parser: Arc<dyn ConfirmParser>,
}

impl std::fmt::Debug for ConfirmHit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmHit")
            .field("info", &self.info)
            .field("parser", &self.parser.meta().name)
            .finish()
    }
}

/// Registry of state, output and confirm parsers.
#[derive(Default)]
pub struct ParserRegistry {
    state_parsers: Vec<Arc<dyn StateParser>>,
    output_parsers: Vec<Arc<dyn OutputParser>>,
    confirm_parsers: Vec<Arc<dyn ConfirmParser>>,
}

impl ParserRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a state parser; the set is re-sorted by descending priority.
    pub fn register_state(&mut self, parser: Arc<dyn StateParser>) {
        self.state_parsers.push(parser);
        self.state_parsers
            .sort_by_key(|p| std::cmp::Reverse(p.meta().priority));
    }

    /// Register an output parser; the set is re-sorted by descending priority.
    pub fn register_output(&mut self, parser: Arc<dyn OutputParser>) {
        self.output_parsers.push(parser);
        self.output_parsers
            .sort_by_key(|p| std::cmp::Reverse(p.meta().priority));
    }

    /// Register a confirm parser; the set is re-sorted by descending priority.
    pub fn register_confirm(&mut self, parser: Arc<dyn ConfirmParser>) {
        self.confirm_parsers.push(parser);
        self.confirm_parsers
            .sort_by_key(|p| std::cmp::Reverse(p.meta().priority));
    }

    /// Remove a parser by name from whichever family holds it.
    pub fn unregister(&mut self, name: &str) {
        self.state_parsers.retain(|p| p.meta().name != name);
        self.output_parsers.retain(|p| p.meta().name != name);
        self.confirm_parsers.retain(|p| p.meta().name != name);
    }

    /// Drop every parser.
    pub fn clear(&mut self) {
        self.state_parsers.clear();
        self.output_parsers.clear();
        self.confirm_parsers.clear();
    }

    /// Registered state parsers, priority order.
    pub fn state_parsers(&self) -> &[Arc<dyn StateParser>] {
        &self.state_parsers
    }

    /// Registered output parsers, priority order.
    pub fn output_parsers(&self) -> &[Arc<dyn OutputParser>] {
        &self.output_parsers
    }

    /// Registered confirm parsers, priority order.
    pub fn confirm_parsers(&self) -> &[Arc<dyn ConfirmParser>] {
        &self.confirm_parsers
    }

    /// Ask every state parser; keep the most confident answer. Since the
    /// list is priority-sorted and the comparison is strict, ties resolve
    /// to the higher-priority parser.
    pub fn detect_state(&self, ctx: &ParserContext) -> Option<StateDetection> {
        let mut best: Option<StateDetection> = None;
        for parser in &self.state_parsers {
            let result = catch_unwind(AssertUnwindSafe(|| parser.detect_state(ctx)));
            let detection = match result {
                Ok(d) => d,
                Err(_) => {
                    warn!(parser = %parser.meta().name, "state parser panicked, treating as no match");
                    None
                }
            };
            if let Some(d) = detection {
                if best.as_ref().is_none_or(|b| d.confidence > b.confidence) {
                    best = Some(d);
                }
            }
        }
        best
    }

    /// Ask every output parser whose gate passes; keep the most confident
    /// record. Parsers that panic are skipped silently.
    pub fn parse_output(&self, ctx: &ParserContext) -> Option<SemanticOutput> {
        let mut best: Option<SemanticOutput> = None;
        for parser in &self.output_parsers {
            let result = catch_unwind(AssertUnwindSafe(|| {
                if parser.can_parse(ctx) {
                    parser.parse(ctx)
                } else {
                    None
                }
            }));
            let output = match result {
                Ok(o) => o,
                Err(_) => {
                    warn!(parser = %parser.meta().name, "output parser panicked, skipping");
                    None
                }
            };
            if let Some(o) = output {
                if best.as_ref().is_none_or(|b| o.confidence > b.confidence) {
                    best = Some(o);
                }
            }
        }
        best
    }

    /// Ask confirm parsers in priority order; the first positive detection
    /// wins and its parser is returned alongside the dialog info.
    pub fn detect_confirm(&self, ctx: &ParserContext) -> Option<ConfirmHit> {
        for parser in &self.confirm_parsers {
            let result = catch_unwind(AssertUnwindSafe(|| parser.detect_confirm(ctx)));
            match result {
                Ok(Some(info)) => {
                    return Some(ConfirmHit {
                        info,
                        parser: Arc::clone(parser),
                    });
                }
                Ok(None) => {}
                Err(_) => {
                    warn!(parser = %parser.meta().name, "confirm parser panicked, treating as no match");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{
        ConfirmResponse, ConfirmType, OutputData, ParserMeta, SessionState,
    };

    struct FixedState {
        meta: ParserMeta,
        state: SessionState,
        confidence: f64,
    }

    impl StateParser for FixedState {
        fn meta(&self) -> &ParserMeta {
            &self.meta
        }
        fn detect_state(&self, _ctx: &ParserContext) -> Option<StateDetection> {
            Some(StateDetection::new(self.state, self.confidence))
        }
    }

    struct PanickingState {
        meta: ParserMeta,
    }

    impl StateParser for PanickingState {
        fn meta(&self) -> &ParserMeta {
            &self.meta
        }
        fn detect_state(&self, _ctx: &ParserContext) -> Option<StateDetection> {
            panic!("malformed parser");
        }
    }

    struct FixedOutput {
        meta: ParserMeta,
        confidence: f64,
        gate: bool,
    }

    impl OutputParser for FixedOutput {
        fn meta(&self) -> &ParserMeta {
            &self.meta
        }
        fn can_parse(&self, _ctx: &ParserContext) -> bool {
            self.gate
        }
        fn parse(&self, ctx: &ParserContext) -> Option<SemanticOutput> {
            Some(SemanticOutput {
                raw: ctx.screen_text.clone(),
                data: OutputData::Text {
                    content: ctx.screen_text.clone(),
                },
                confidence: self.confidence,
                parser_name: self.meta.name.clone(),
            })
        }
    }

    struct FixedConfirm {
        meta: ParserMeta,
        hit: bool,
    }

    impl ConfirmParser for FixedConfirm {
        fn meta(&self) -> &ParserMeta {
            &self.meta
        }
        fn detect_confirm(&self, ctx: &ParserContext) -> Option<ConfirmInfo> {
            self.hit.then(|| ConfirmInfo {
                confirm_type: ConfirmType::YesNo,
                prompt: "ok?".into(),
                options: None,
                tool: None,
                raw_prompt: ctx.screen_text.clone(),
            })
        }
        fn format_response(&self, _info: &ConfirmInfo, _response: &ConfirmResponse) -> Vec<u8> {
            format!("{}!", self.meta.name).into_bytes()
        }
    }

    fn ctx() -> ParserContext {
        ParserContext::from_lines(vec!["line".into()])
    }

    #[test]
    fn test_state_best_confidence_wins() {
        let mut reg = ParserRegistry::new();
        reg.register_state(Arc::new(FixedState {
            meta: ParserMeta::new("low", 10),
            state: SessionState::Idle,
            confidence: 0.5,
        }));
        reg.register_state(Arc::new(FixedState {
            meta: ParserMeta::new("high", 5),
            state: SessionState::Error,
            confidence: 0.9,
        }));

        let d = reg.detect_state(&ctx()).unwrap();
        assert_eq!(d.state, SessionState::Error);
        assert_eq!(d.confidence, 0.9);
    }

    #[test]
    fn test_state_tie_resolves_to_priority() {
        let mut reg = ParserRegistry::new();
        reg.register_state(Arc::new(FixedState {
            meta: ParserMeta::new("low-priority", 10),
            state: SessionState::Idle,
            confidence: 0.8,
        }));
        reg.register_state(Arc::new(FixedState {
            meta: ParserMeta::new("high-priority", 100),
            state: SessionState::Thinking,
            confidence: 0.8,
        }));

        // Equal confidence: the higher-priority parser is consulted first
        // and a later equal score does not displace it.
        let d = reg.detect_state(&ctx()).unwrap();
        assert_eq!(d.state, SessionState::Thinking);
    }

    #[test]
    fn test_panicking_parser_is_no_match() {
        let mut reg = ParserRegistry::new();
        reg.register_state(Arc::new(PanickingState {
            meta: ParserMeta::new("bad", 100),
        }));
        reg.register_state(Arc::new(FixedState {
            meta: ParserMeta::new("good", 10),
            state: SessionState::Idle,
            confidence: 0.7,
        }));

        let d = reg.detect_state(&ctx()).unwrap();
        assert_eq!(d.state, SessionState::Idle);
    }

    #[test]
    fn test_output_gate_and_best() {
        let mut reg = ParserRegistry::new();
        reg.register_output(Arc::new(FixedOutput {
            meta: ParserMeta::new("gated-off", 90),
            confidence: 0.99,
            gate: false,
        }));
        reg.register_output(Arc::new(FixedOutput {
            meta: ParserMeta::new("weak", 50),
            confidence: 0.6,
            gate: true,
        }));
        reg.register_output(Arc::new(FixedOutput {
            meta: ParserMeta::new("strong", 10),
            confidence: 0.9,
            gate: true,
        }));

        let o = reg.parse_output(&ctx()).unwrap();
        assert_eq!(o.parser_name, "strong");
    }

    #[test]
    fn test_confirm_first_hit_wins_and_formats() {
        let mut reg = ParserRegistry::new();
        reg.register_confirm(Arc::new(FixedConfirm {
            meta: ParserMeta::new("miss", 100),
            hit: false,
        }));
        reg.register_confirm(Arc::new(FixedConfirm {
            meta: ParserMeta::new("winner", 50),
            hit: true,
        }));
        reg.register_confirm(Arc::new(FixedConfirm {
            meta: ParserMeta::new("shadowed", 10),
            hit: true,
        }));

        let hit = reg.detect_confirm(&ctx()).unwrap();
        assert_eq!(hit.parser.meta().name, "winner");
        let bytes = hit
            .parser
            .format_response(&hit.info, &ConfirmResponse::confirm());
        assert_eq!(bytes, b"winner!");
    }

    #[test]
    fn test_unregister_and_clear() {
        let mut reg = ParserRegistry::new();
        reg.register_state(Arc::new(FixedState {
            meta: ParserMeta::new("s", 10),
            state: SessionState::Idle,
            confidence: 0.5,
        }));
        reg.register_confirm(Arc::new(FixedConfirm {
            meta: ParserMeta::new("c", 10),
            hit: true,
        }));

        reg.unregister("s");
        assert!(reg.state_parsers().is_empty());
        assert_eq!(reg.confirm_parsers().len(), 1);

        reg.clear();
        assert!(reg.confirm_parsers().is_empty());
    }

    #[test]
    fn test_empty_registry_detects_nothing() {
        let reg = ParserRegistry::new();
        assert!(reg.detect_state(&ctx()).is_none());
        assert!(reg.parse_output(&ctx()).is_none());
        assert!(reg.detect_confirm(&ctx()).is_none());
    }
}
