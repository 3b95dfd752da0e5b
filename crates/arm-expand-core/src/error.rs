use std::fmt;

/// Result alias used throughout expression evaluation.
pub type Result<T, E = ExpressionError> = std::result::Result<T, E>;

/// Typed sub-reason attached to [`ExpressionError::Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionErrorKind {
    /// A resource id was built from a different number of type and name segments.
    MismatchingResourceSegments,
    /// A value could not be formatted or converted.
    InvalidFormat,
    /// A requested range exceeds the available data.
    OutOfRange,
    /// A division or modulo by zero.
    DivideByZero,
    /// The function is not valid in the current deployment scope.
    InvalidScope,
    /// Any other failure inside a function body.
    Unknown,
}

impl fmt::Display for FunctionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FunctionErrorKind::MismatchingResourceSegments => "MismatchingResourceSegments",
            FunctionErrorKind::InvalidFormat => "InvalidFormat",
            FunctionErrorKind::OutOfRange => "OutOfRange",
            FunctionErrorKind::DivideByZero => "DivideByZero",
            FunctionErrorKind::InvalidScope => "InvalidScope",
            FunctionErrorKind::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Errors raised while parsing or evaluating a single template expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("failed to parse expression '{expression}': {reason}")]
    Parse { expression: String, reason: String },
    #[error("the expression is {length} characters long which exceeds the maximum of {max}")]
    TooLong { length: usize, max: usize },
    #[error("invalid argument '{operand}' for function '{function}': expected {expected}")]
    Argument {
        function: String,
        operand: String,
        expected: String,
    },
    #[error("function '{function}' failed ({kind}): {reason}")]
    Function {
        function: String,
        kind: FunctionErrorKind,
        reason: String,
    },
    #[error("the property '{property}' does not exist")]
    Reference { property: String },
    #[error("unable to resolve '{symbol}': {reason}")]
    Symbol { symbol: String, reason: String },
    #[error("the function '{function}' is not implemented{}", did_you_mean(.suggestion))]
    NotImplemented {
        function: String,
        suggestion: Option<String>,
    },
    #[error("deployment failed: {message}")]
    DeploymentFailure { message: String },
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!("; did you mean '{}'?", s),
        None => String::new(),
    }
}

impl ExpressionError {
    /// Creates an argument error for `function` where `operand` did not match `expected`.
    pub fn argument(
        function: impl Into<String>,
        operand: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        ExpressionError::Argument {
            function: function.into(),
            operand: operand.into(),
            expected: expected.into(),
        }
    }

    /// Creates an argument error for a wrong number of arguments.
    pub fn arity(function: impl Into<String>, expected: impl Into<String>) -> Self {
        ExpressionError::Argument {
            function: function.into(),
            operand: "arguments".to_string(),
            expected: expected.into(),
        }
    }

    /// Creates a function error with a typed reason.
    pub fn function(
        function: impl Into<String>,
        kind: FunctionErrorKind,
        reason: impl Into<String>,
    ) -> Self {
        ExpressionError::Function {
            function: function.into(),
            kind,
            reason: reason.into(),
        }
    }

    pub fn reference(property: impl Into<String>) -> Self {
        ExpressionError::Reference {
            property: property.into(),
        }
    }

    pub fn symbol(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        ExpressionError::Symbol {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    /// Returns the name of the function that raised this error, if known.
    pub fn function_name(&self) -> Option<&str> {
        match self {
            ExpressionError::Argument { function, .. }
            | ExpressionError::Function { function, .. }
            | ExpressionError::NotImplemented { function, .. } => Some(function),
            _ => None,
        }
    }
}

/// Errors raised by the deployment visitor while expanding a template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeploymentError {
    #[error("{path}: failed to evaluate '{expression}': {source}")]
    Expression {
        path: String,
        expression: String,
        #[source]
        source: ExpressionError,
    },
    #[error("parameter '{name}': {reason}")]
    Parameter { name: String, reason: String },
    #[error("invalid template: {reason}")]
    Template { reason: String },
}

impl DeploymentError {
    /// Returns the underlying expression error, if any.
    pub fn expression_error(&self) -> Option<&ExpressionError> {
        match self {
            DeploymentError::Expression { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn template(reason: impl Into<String>) -> Self {
        DeploymentError::Template {
            reason: reason.into(),
        }
    }
}
