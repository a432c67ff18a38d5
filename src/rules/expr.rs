//! Parsing of rule-file call expressions: `name(arg1, arg2, ...)`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("malformed call expression `{0}`")]
    Malformed(String),
    #[error("bad function name in `{0}`")]
    BadName(String),
    #[error("empty argument in `{0}`")]
    EmptyArgument(String),
}

/// A parsed function invocation: a name and a fixed string-argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallExpr {
    pub name: String,
    pub args: Vec<String>,
}

impl CallExpr {
    pub fn parse(input: &str) -> Result<Self, ExprError> {
        let trimmed = input.trim();
        let open = trimmed
            .find('(')
            .ok_or_else(|| ExprError::Malformed(input.to_string()))?;
        if !trimmed.ends_with(')') {
            return Err(ExprError::Malformed(input.to_string()));
        }

        let name = trimmed[..open].trim();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ExprError::BadName(input.to_string()));
        }

        let inner = &trimmed[open + 1..trimmed.len() - 1];
        let args = if inner.trim().is_empty() {
            Vec::new()
        } else {
            let args: Vec<String> = inner.split(',').map(|a| a.trim().to_string()).collect();
            if args.iter().any(|a| a.is_empty()) {
                return Err(ExprError::EmptyArgument(input.to_string()));
            }
            args
        };

        Ok(CallExpr {
            name: name.to_string(),
            args,
        })
    }
}

impl std::fmt::Display for CallExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.args.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_no_args() {
        let expr = CallExpr::parse("event_is_buy()").unwrap();
        assert_eq!(expr.name, "event_is_buy");
        assert!(expr.args.is_empty());
    }

    #[test]
    fn test_parse_args_trimmed() {
        let expr = CallExpr::parse("  quantity_at_least( 3 , 5 )  ").unwrap();
        assert_eq!(expr.name, "quantity_at_least");
        assert_eq!(expr.args, vec!["3", "5"]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            CallExpr::parse("no_parens"),
            Err(ExprError::Malformed(_))
        ));
        assert!(matches!(
            CallExpr::parse("unclosed(1"),
            Err(ExprError::Malformed(_))
        ));
        assert!(matches!(
            CallExpr::parse("(1)"),
            Err(ExprError::BadName(_))
        ));
        assert!(matches!(
            CallExpr::parse("bad name(1)"),
            Err(ExprError::BadName(_))
        ));
        assert!(matches!(
            CallExpr::parse("f(1,,2)"),
            Err(ExprError::EmptyArgument(_))
        ));
    }
}
