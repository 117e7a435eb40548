// Copyright contributors to the frt compiler project
// SPDX-License-Identifier: Apache-2.0

// The diagnostics sink shared by the resolver and the verifier. The sink is
// append-only for the duration of a pass and drained between passes.

use crate::location::Location;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

/// Which pass emitted the diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Semantic,
    AsrVerify,
}

/// Classification of semantic and verification failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// An identifier string fails the validity rule.
    LexicalName,
    /// A name already bound in the same scope.
    DuplicateSymbol,
    /// A reference has no binding in any visible scope.
    UnresolvedSymbol,
    /// A type-form invariant: array nesting, pointer-of-allocatable,
    /// deferred-length misuse, and so on.
    TypeShape,
    /// Call argument count, or Function/FunctionType arity disagreement.
    ArityMismatch,
    /// Assignment to an `in` parameter, or re-assignment of a parameter
    /// constant.
    IntentViolation,
    /// The stored dependency list disagrees with the walked set.
    DependencyDrift,
    /// `use` loops without progress after a fixed-point pass.
    CyclicImport,
    /// An instantiation argument fails a restriction, or the parameter
    /// count is wrong.
    TemplateMisuse,
    /// An invariant the compiler itself should have maintained.
    Internal,
}

#[derive(Clone, Debug)]
pub struct Label {
    pub message: String,
    pub loc: Location,
}

impl Label {
    pub fn new<T: ToString>(message: T, loc: Location) -> Label {
        Label {
            message: message.to_string(),
            loc,
        }
    }

    pub fn primary(loc: Location) -> Label {
        Label::new("", loc)
    }
}

#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub message: String,
    pub level: Level,
    pub stage: Stage,
    pub kind: Option<ErrorKind>,
    pub labels: Vec<Label>,
}

impl Diagnostic {
    pub fn new<T: ToString>(
        message: T,
        level: Level,
        stage: Stage,
        labels: Vec<Label>,
    ) -> Diagnostic {
        Diagnostic {
            message: message.to_string(),
            level,
            stage,
            kind: None,
            labels,
        }
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Diagnostic {
        self.kind = Some(kind);
        self
    }

    pub fn loc(&self) -> Option<Location> {
        self.labels.first().map(|l| l.loc)
    }
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    list: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.list.push(diagnostic);
    }

    pub fn add_error<T: ToString>(&mut self, message: T, labels: Vec<Label>) {
        self.add(Diagnostic::new(message, Level::Error, Stage::Semantic, labels));
    }

    pub fn add_warning<T: ToString>(&mut self, message: T, labels: Vec<Label>) {
        self.add(Diagnostic::new(
            message,
            Level::Warning,
            Stage::Semantic,
            labels,
        ));
    }

    /// The single-label form used throughout the verifier.
    pub fn message_label<T: ToString>(
        &mut self,
        message: T,
        loc: Location,
        level: Level,
        stage: Stage,
    ) {
        self.add(Diagnostic::new(
            message,
            level,
            stage,
            vec![Label::primary(loc)],
        ));
    }

    pub fn has_error(&self) -> bool {
        self.list.iter().any(|d| d.level == Level::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.list.iter()
    }

    /// Error kinds in emission order; handy in tests.
    pub fn error_kinds(&self) -> Vec<ErrorKind> {
        self.list
            .iter()
            .filter(|d| d.level == Level::Error)
            .filter_map(|d| d.kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Flush between passes.
    pub fn drain(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.list)
    }
}
