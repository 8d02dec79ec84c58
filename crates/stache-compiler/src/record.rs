//! Buffered sink calls.
//!
//! [`crate::compile`] records into a [`Recording`] and replays it into the
//! caller's sink only once the whole template compiled, so a failed compile
//! never reaches the caller's sink.

use crate::error::CompileError;
use crate::instruction::{Escaping, Expr, Guard, InstructionSink, LambdaCall, SubCompile};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Literal(String),
    Value(Expr, Escaping),
    EnterSection(Guard),
    ExitSection,
    EnterInverted(Guard),
    ExitInverted,
    InvokePartial(String),
    ExitPartial,
    /// The callback is run while recording; its outcome is handed back
    /// whenever the replay target asks for it.
    Lambda {
        call: LambdaCall,
        body: Result<Recording, CompileError>,
    },
    EnterBlock(String),
    ExitBlock,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Recording {
    events: Vec<Event>,
}

impl Recording {
    pub(crate) fn replay(&self, sink: &mut dyn InstructionSink) -> Result<(), CompileError> {
        for event in &self.events {
            match event {
                Event::Literal(text) => sink.literal(text),
                Event::Value(expr, escaping) => sink.emit_value(expr, *escaping),
                Event::EnterSection(guard) => sink.enter_section(guard),
                Event::ExitSection => sink.exit_section(),
                Event::EnterInverted(guard) => sink.enter_inverted(guard),
                Event::ExitInverted => sink.exit_inverted(),
                Event::InvokePartial(name) => sink.invoke_partial(name),
                Event::ExitPartial => sink.exit_partial(),
                Event::Lambda { call, body } => {
                    let mut compile = |nested: &mut dyn InstructionSink| match body {
                        Ok(recording) => recording.replay(nested),
                        Err(error) => Err(error.clone()),
                    };
                    sink.invoke_lambda(call, &mut compile)?;
                }
                Event::EnterBlock(name) => sink.enter_block(name),
                Event::ExitBlock => sink.exit_block(),
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.events.len()
    }
}

impl InstructionSink for Recording {
    fn literal(&mut self, text: &str) {
        self.events.push(Event::Literal(text.to_string()));
    }

    fn emit_value(&mut self, expr: &Expr, escaping: Escaping) {
        self.events.push(Event::Value(expr.clone(), escaping));
    }

    fn enter_section(&mut self, guard: &Guard) {
        self.events.push(Event::EnterSection(guard.clone()));
    }

    fn exit_section(&mut self) {
        self.events.push(Event::ExitSection);
    }

    fn enter_inverted(&mut self, guard: &Guard) {
        self.events.push(Event::EnterInverted(guard.clone()));
    }

    fn exit_inverted(&mut self) {
        self.events.push(Event::ExitInverted);
    }

    fn invoke_partial(&mut self, name: &str) {
        self.events.push(Event::InvokePartial(name.to_string()));
    }

    fn exit_partial(&mut self) {
        self.events.push(Event::ExitPartial);
    }

    fn invoke_lambda(
        &mut self,
        call: &LambdaCall,
        compile: &mut SubCompile<'_>,
    ) -> Result<(), CompileError> {
        let mut nested = Recording::default();
        let body = compile(&mut nested).map(|()| nested);
        self.events.push(Event::Lambda {
            call: call.clone(),
            body,
        });
        Ok(())
    }

    fn enter_block(&mut self, name: &str) {
        self.events.push(Event::EnterBlock(name.to_string()));
    }

    fn exit_block(&mut self) {
        self.events.push(Event::ExitBlock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::LambdaKind;
    use pretty_assertions::assert_eq;

    fn call() -> LambdaCall {
        LambdaCall {
            name: "bold".into(),
            body: "x".into(),
            current: Expr::var("data"),
            escaping: Escaping::Raw,
            kind: LambdaKind::Raw,
            indent: String::new(),
        }
    }

    #[test]
    fn test_replay_preserves_order() {
        let mut recording = Recording::default();
        recording.literal("a");
        recording.enter_section(&Guard::Truthy(Expr::var("data").field("flag")));
        recording.emit_value(&Expr::var("data").field("title"), Escaping::Escaped);
        recording.exit_section();

        let mut copy = Recording::default();
        recording.replay(&mut copy).unwrap();
        assert_eq!(copy, recording);
        assert_eq!(copy.len(), 4);
    }

    #[test]
    fn test_lambda_body_recorded_once_replayed_on_demand() {
        let mut recording = Recording::default();
        let mut runs = 0;
        let mut compile = |sink: &mut dyn InstructionSink| -> Result<(), CompileError> {
            runs += 1;
            sink.literal("body");
            Ok(())
        };
        recording.invoke_lambda(&call(), &mut compile).unwrap();
        assert_eq!(runs, 1);

        let mut outer = Recording::default();
        recording.replay(&mut outer).unwrap();
        let Some(Event::Lambda { body: Ok(body), .. }) = outer.events.first() else {
            panic!("expected a lambda event")
        };
        assert_eq!(body.events, vec![Event::Literal("body".into())]);
    }

    #[test]
    fn test_failed_lambda_body_surfaces_only_when_asked() {
        let mut recording = Recording::default();
        let mut compile = |_: &mut dyn InstructionSink| -> Result<(), CompileError> {
            Err(CompileError::IncludeDepth {
                name: "bold".into(),
                depth: 1,
                position: stache_lexer::Position::unknown(),
                templates: "page".into(),
            })
        };
        assert!(recording.invoke_lambda(&call(), &mut compile).is_ok());

        // a recording target runs the callback and keeps the failure
        let mut outer = Recording::default();
        assert!(recording.replay(&mut outer).is_ok());
        assert!(matches!(
            outer.events.first(),
            Some(Event::Lambda { body: Err(_), .. })
        ));
    }
}
