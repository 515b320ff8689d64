//! # Classification
//!
//! Interpreters try to make sense of complete messages (HTTP requests and
//! responses, plain text). Each interpreter has its own list of handlers,
//! run on the parsed result to tag the message.

use anyhow::Result;
use serde::Deserialize;

use crate::{
    core::events::Message,
    events::{EventMetadata, ReportEvent},
};

pub(crate) mod card;
pub(crate) mod http;
pub(crate) use http::*;
pub(crate) mod pipeline;
pub(crate) use pipeline::*;
pub(crate) mod text;
pub(crate) use text::*;

/// Parses messages into a typed representation.
pub(crate) trait Interpreter: Send {
    type Output;

    fn name(&self) -> &'static str;
    /// Parse a message, `None` if the message is not of the right kind.
    fn parse(&self, msg: &Message) -> Option<Self::Output>;
    /// Add what was parsed to the report.
    fn summarize(&self, _parsed: &Self::Output, _event: &mut ReportEvent) {}
}

/// Inspects the parsed form of a message and tags it.
pub(crate) trait Handler<T>: Send {
    fn name(&self) -> &'static str;
    fn handle(&self, msg: &Message, parsed: &T, metadata: &mut EventMetadata) -> Result<()>;
}

/// Outcome of offering a message to a stage.
#[derive(Debug)]
pub(crate) enum Offer {
    /// The interpreter could not parse the message.
    Rejected,
    /// Parsed, all handlers ran.
    Accepted,
    /// Parsed, but a handler failed and the following ones did not run.
    HandlerFailed(anyhow::Error),
}

/// Type erased interpreter and its handlers, as registered in the pipeline.
pub(crate) trait Stage: Send {
    fn name(&self) -> &'static str;
    fn offer(&self, msg: &Message, event: &mut ReportEvent, metadata: &mut EventMetadata) -> Offer;
}

/// An interpreter and the handlers run, in order, on its output.
pub(crate) struct Chain<I: Interpreter> {
    interpreter: I,
    handlers: Vec<Box<dyn Handler<I::Output>>>,
}

impl<I: Interpreter> Chain<I> {
    pub(crate) fn new(interpreter: I) -> Chain<I> {
        Chain {
            interpreter,
            handlers: Vec::new(),
        }
    }

    pub(crate) fn handler<H>(mut self, handler: H) -> Chain<I>
    where
        H: Handler<I::Output> + 'static,
    {
        self.handlers.push(Box::new(handler));
        self
    }
}

impl<I: Interpreter> Stage for Chain<I> {
    fn name(&self) -> &'static str {
        self.interpreter.name()
    }

    fn offer(&self, msg: &Message, event: &mut ReportEvent, metadata: &mut EventMetadata) -> Offer {
        let Some(parsed) = self.interpreter.parse(msg) else {
            return Offer::Rejected;
        };
        self.interpreter.summarize(&parsed, event);

        for handler in self.handlers.iter() {
            if let Err(e) = handler.handle(msg, &parsed, metadata) {
                return Offer::HandlerFailed(e.context(format!(
                    "{} handler {}",
                    self.interpreter.name(),
                    handler.name()
                )));
            }
        }
        Offer::Accepted
    }
}

/// Interpreters available from the configuration, with their default
/// handlers.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum InterpreterKind {
    HttpRequest,
    HttpResponse,
    Plaintext,
}

impl InterpreterKind {
    /// Default registration order.
    pub(crate) fn defaults() -> Vec<InterpreterKind> {
        vec![
            InterpreterKind::HttpRequest,
            InterpreterKind::HttpResponse,
            InterpreterKind::Plaintext,
        ]
    }

    pub(crate) fn stage(&self, plaintext_threshold: f64) -> Result<Box<dyn Stage>> {
        Ok(match self {
            InterpreterKind::HttpRequest => {
                Box::new(Chain::new(HttpRequestInterpreter).handler(AwsApiHandler))
            }
            InterpreterKind::HttpResponse => Box::new(Chain::new(HttpResponseInterpreter)),
            InterpreterKind::Plaintext => Box::new(
                Chain::new(PlaintextInterpreter::new(plaintext_threshold))
                    .handler(CardNumberHandler::new()?)
                    .handler(PaymentKeywordsHandler)
                    .handler(AddressKeywordsHandler),
            ),
        })
    }
}
