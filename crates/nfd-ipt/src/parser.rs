use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use thiserror::Error;

static POLICY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-P\s+(\S+)\s+(\S+)").expect("valid regex"));
static NEW_CHAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-N\s+(\S+)\s*$").expect("valid regex"));
static APPEND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-A\s+(\S+)(?:\s+(.*))?$").expect("valid regex"));

/// A line of `iptables -S` output that could not be understood
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseAnomaly {
    #[error("unrecognized line: {0}")]
    Unrecognized(String),
    #[error("unterminated quote in: {0}")]
    UnterminatedQuote(String),
}

/// One line of `iptables -S` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveLine {
    /// `-P <builtin> <policy>`
    Policy { chain: String, target: String },
    /// `-N <chain>`
    NewChain(String),
    /// `-A <chain> <spec>`
    Rule(RuleSpec),
}

/// A rule as listed by `-S`, split into match clause and target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub table: String,
    pub chain: String,
    pub matches: Vec<String>,
    /// `-j`/`-g` target, if the rule has one
    pub target: Option<String>,
    /// Target was given with `-g`
    pub goto: bool,
    pub target_args: Vec<String>,
    /// The listed line, untouched
    pub raw: String,
}

impl RuleSpec {
    /// Arguments after the chain name, ready to replay with `-D <chain>`
    pub fn spec_args(&self) -> Vec<String> {
        let mut args = self.matches.clone();
        if let Some(target) = &self.target {
            args.push(if self.goto { "-g" } else { "-j" }.to_string());
            args.push(target.clone());
            args.extend(self.target_args.iter().cloned());
        }
        args
    }

    /// The rule jumps (or goes) to `chain`
    pub fn references_chain(&self, chain: &str) -> bool {
        self.target.as_deref() == Some(chain)
    }

    /// `chain` appears anywhere in the listed text
    pub fn mentions(&self, chain: &str) -> bool {
        self.raw.contains(chain)
    }

    /// Value following `option` in the match clause, e.g. `--physdev-in`
    pub fn match_value(&self, option: &str) -> Option<&str> {
        self.matches
            .iter()
            .position(|arg| arg == option)
            .and_then(|idx| self.matches.get(idx + 1))
            .map(String::as_str)
    }
}

/// Parse one line; blank lines yield `Ok(None)`
pub fn parse_line(table: &str, line: &str) -> Result<Option<SaveLine>, ParseAnomaly> {
    let line = line.trim_end();
    if line.trim().is_empty() {
        return Ok(None);
    }

    if let Some(caps) = NEW_CHAIN_RE.captures(line) {
        return Ok(Some(SaveLine::NewChain(caps[1].to_string())));
    }

    if let Some(caps) = POLICY_RE.captures(line) {
        return Ok(Some(SaveLine::Policy {
            chain: caps[1].to_string(),
            target: caps[2].to_string(),
        }));
    }

    if let Some(caps) = APPEND_RE.captures(line) {
        let chain = caps[1].to_string();
        let rest = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let tokens =
            split_args(rest).ok_or_else(|| ParseAnomaly::UnterminatedQuote(line.to_string()))?;

        let jump = tokens.iter().position(|t| t == "-j" || t == "-g");
        let (matches, target, goto, target_args) = match jump {
            Some(idx) if idx + 1 < tokens.len() => (
                tokens[..idx].to_vec(),
                Some(tokens[idx + 1].clone()),
                tokens[idx] == "-g",
                tokens[idx + 2..].to_vec(),
            ),
            _ => (tokens, None, false, vec![]),
        };

        return Ok(Some(SaveLine::Rule(RuleSpec {
            table: table.to_string(),
            chain,
            matches,
            target,
            goto,
            target_args,
            raw: line.to_string(),
        })));
    }

    Err(ParseAnomaly::Unrecognized(line.to_string()))
}

/// Split a `-S` argument list, honoring the double quotes iptables puts
/// around arguments containing spaces. `None` on an unterminated quote.
pub fn split_args(input: &str) -> Option<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            '\\' if quoted => {
                current.push(chars.next()?);
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quoted {
        return None;
    }
    if in_token {
        args.push(current);
    }
    Some(args)
}

/// User-defined chains of a table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSet(BTreeSet<String>);

impl ChainSet {
    pub fn contains(&self, chain: &str) -> bool {
        self.0.contains(chain)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for ChainSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Rules in listing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet(Vec<RuleSpec>);

impl RuleSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RuleSpec> {
        self.0.iter()
    }

    /// Rules of one chain
    pub fn in_chain(&self, chain: &str) -> RuleSet {
        self.0.iter().filter(|r| r.chain == chain).cloned().collect()
    }

    /// Rules pointing at `chain`, by jump target or, when `loose`, by any
    /// textual mention
    pub fn linking_to(&self, chain: &str, loose: bool) -> Vec<&RuleSpec> {
        self.0
            .iter()
            .filter(|r| {
                if loose {
                    r.mentions(chain)
                } else {
                    r.references_chain(chain)
                }
            })
            .collect()
    }
}

impl FromIterator<RuleSpec> for RuleSet {
    fn from_iter<I: IntoIterator<Item = RuleSpec>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a RuleSpec;
    type IntoIter = std::slice::Iter<'a, RuleSpec>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Everything one `-S` dump says about a table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    pub table: String,
    pub chains: ChainSet,
    pub rules: RuleSet,
}

impl TableSnapshot {
    /// Parse a full dump. Lines outside the grammar are logged and skipped.
    pub fn parse(table: &str, dump: &str) -> Self {
        let mut chains = Vec::new();
        let mut rules = Vec::new();

        for line in dump.lines() {
            match parse_line(table, line) {
                Ok(Some(SaveLine::NewChain(name))) => chains.push(name),
                Ok(Some(SaveLine::Rule(rule))) => rules.push(rule),
                Ok(Some(SaveLine::Policy { .. })) | Ok(None) => {}
                Err(anomaly) => tracing::debug!("skipping iptables output: {}", anomaly),
            }
        }

        Self {
            table: table.to_string(),
            chains: chains.into_iter().collect(),
            rules: rules.into_iter().collect(),
        }
    }
}
