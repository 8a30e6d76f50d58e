//! Script reader.
//!
//! ```text
//! PCore Name {
//!     a = 1            # constant
//!     b = a + 3        # function of parents
//!     d ~ binom(b, 0.5)
//!     z = f(a, d)      # pseudo node
//!     n                # exogenous input
//! }
//! ```
//!
//! Statements are separated by newlines or `;`.

use std::sync::Arc;

use regex::Regex;

use super::bayesnet::BayesianNetwork;
use super::loci::{split_top_level, Loci};
use crate::error::ValidationError;
use crate::expr::MathExpression;
use crate::registry::Registry;

fn pattern(re: &str) -> Result<Regex, ValidationError> {
    Regex::new(re).map_err(|e| ValidationError::Parse {
        input: re.to_string(),
        reason: e.to_string(),
    })
}

/// Parse one statement into a node and its description.
pub fn parse_statement(statement: &str, registry: &Registry) -> Result<(Loci, Option<String>), ValidationError> {
    let (body, description) = match statement.split_once('#') {
        Some((b, d)) => {
            let d = d.trim();
            (b.trim(), (!d.is_empty()).then(|| d.to_string()))
        }
        None => (statement.trim(), None),
    };

    let parse_err = |reason: &str| ValidationError::Parse {
        input: statement.trim().to_string(),
        reason: reason.to_string(),
    };
    let ident = pattern(r"^[A-Za-z_][A-Za-z0-9_]*$")?;

    let loci = if let Some((name, rhs)) = body.split_once('~') {
        let name = name.trim();
        if !ident.is_match(name) {
            return Err(parse_err("invalid node name"));
        }
        Loci::distribution(name, rhs, registry)?
    } else if let Some((name, rhs)) = body.split_once('=') {
        let name = name.trim();
        let rhs = rhs.trim();
        if !ident.is_match(name) {
            return Err(parse_err("invalid node name"));
        }
        let pseudo = pattern(r"^f\s*\((.*)\)$")?;
        if let Some(caps) = pseudo.captures(rhs) {
            Loci::pseudo(name, split_top_level(&caps[1]))
        } else {
            let expr = MathExpression::parse(rhs, &registry.functions)?;
            if expr.is_constant() {
                let value = expr
                    .evaluate(&crate::env::Empty)
                    .map_err(|e| parse_err(&e.to_string()))?;
                Loci::value(name, value)
            } else {
                Loci::function(name, rhs, registry)?
            }
        }
    } else if ident.is_match(body) {
        Loci::exo(body)
    } else {
        return Err(parse_err("expected 'name = expr', 'name ~ dist(args)', or 'name'"));
    };
    Ok((loci, description))
}

/// Build and freeze a network from a script.
pub fn bayes_net_from_script(script: &str, registry: Arc<Registry>) -> Result<BayesianNetwork, ValidationError> {
    let header = pattern(r"(?i)pcore\s*([A-Za-z_][A-Za-z0-9_]*)\s*\{")?;
    let caps = header.captures(script).ok_or_else(|| ValidationError::Parse {
        input: script.lines().next().unwrap_or_default().to_string(),
        reason: "missing 'PCore <Name> {' header".to_string(),
    })?;
    let name = caps[1].to_string();
    let start = caps.get(0).map_or(0, |m| m.end());
    let rest = &script[start..];
    let body = rest.rfind('}').map_or(rest, |end| &rest[..end]);

    let mut bn = BayesianNetwork::new(name, registry);
    for statement in body.split(|c: char| c == '\n' || c == ';') {
        if statement.trim().is_empty() || statement.trim_start().starts_with('#') {
            continue;
        }
        let (loci, description) = parse_statement(statement, bn.registry())?;
        match description {
            Some(d) => bn.append_described(loci, d)?,
            None => bn.append_loci(loci)?,
        }
    }
    bn.complete();
    Ok(bn)
}
