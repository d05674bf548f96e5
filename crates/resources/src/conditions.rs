//! Rollout conditions for custom resources: a small JSON-path dialect plus equality predicates,
//! parsed once into an AST when the owning CustomResourceDefinition is constructed.
//!
//! Supported path syntax: `$` root, `.key`, `[n]`, `["key"]` and the equality filter
//! `[?(@.key == "value")]` (the filter key may itself be dotted).

use serde::Deserialize;
use serde_json::Value as Json;
use smallvec::SmallVec;
use vigil_core::json::scalar_string;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    /// Keep array elements whose `key` path renders equal to `value`.
    Filter { key: Vec<String>, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let rest = raw
            .trim()
            .strip_prefix('$')
            .ok_or_else(|| format!("path `{}` must start with `$`", raw))?;
        let mut p = PathParser { src: rest, pos: 0, raw };
        let mut segments = Vec::new();
        while !p.done() {
            segments.push(p.segment()?);
        }
        Ok(Self { raw: raw.trim().to_string(), segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// First value the path selects, if any.
    pub fn first<'a>(&self, root: &'a Json) -> Option<&'a Json> {
        let mut out: SmallVec<[&'a Json; 4]> = SmallVec::new();
        resolve(&self.segments, root, &mut out);
        out.into_iter().next()
    }
}

fn resolve<'a>(segments: &[Segment], cur: &'a Json, out: &mut SmallVec<[&'a Json; 4]>) {
    let Some((head, tail)) = segments.split_first() else {
        out.push(cur);
        return;
    };
    match head {
        Segment::Key(k) => {
            if let Some(next) = cur.get(k.as_str()) {
                resolve(tail, next, out);
            }
        }
        Segment::Index(i) => {
            if let Some(next) = cur.as_array().and_then(|a| a.get(*i)) {
                resolve(tail, next, out);
            }
        }
        Segment::Filter { key, value } => {
            let Some(items) = cur.as_array() else { return };
            for item in items {
                let field = key.iter().try_fold(item, |v, k| v.get(k.as_str()));
                if field.and_then(scalar_string).as_deref() == Some(value.as_str()) {
                    resolve(tail, item, out);
                }
            }
        }
    }
}

struct PathParser<'s> {
    src: &'s str,
    pos: usize,
    raw: &'s str,
}

impl<'s> PathParser<'s> {
    fn done(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn err(&self, what: &str) -> String {
        format!("path `{}`: {} at offset {}", self.raw, what, self.pos + 1)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn ident(&mut self) -> Result<String, String> {
        let len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(self.rest().len());
        if len == 0 {
            return Err(self.err("expected a key"));
        }
        let key = self.rest()[..len].to_string();
        self.pos += len;
        Ok(key)
    }

    fn quoted(&mut self) -> Result<String, String> {
        let quote = match self.rest().chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.err("expected a quoted string")),
        };
        self.pos += 1;
        let end = self.rest().find(quote).ok_or_else(|| self.err("unterminated string"))?;
        let s = self.rest()[..end].to_string();
        self.pos += end + 1;
        Ok(s)
    }

    fn segment(&mut self) -> Result<Segment, String> {
        if self.eat(".") {
            return self.ident().map(Segment::Key);
        }
        if self.eat("[?(") {
            self.skip_ws();
            if !self.eat("@.") {
                return Err(self.err("filter must start with `@.`"));
            }
            let mut key = vec![self.ident()?];
            while self.eat(".") {
                key.push(self.ident()?);
            }
            self.skip_ws();
            if !self.eat("==") {
                return Err(self.err("only `==` filters are supported"));
            }
            self.skip_ws();
            let value = self.quoted()?;
            self.skip_ws();
            if !self.eat(")]") {
                return Err(self.err("expected `)]`"));
            }
            return Ok(Segment::Filter { key, value });
        }
        if self.eat("[") {
            let seg = if self.rest().starts_with(['"', '\'']) {
                Segment::Key(self.quoted()?)
            } else {
                let len = self.rest().find(|c: char| !c.is_ascii_digit()).unwrap_or(self.rest().len());
                let idx = self.rest()[..len].parse().map_err(|_| self.err("expected an index"))?;
                self.pos += len;
                Segment::Index(idx)
            };
            if !self.eat("]") {
                return Err(self.err("expected `]`"));
            }
            return Ok(seg);
        }
        Err(self.err("unexpected character"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Equals { path: FieldPath, value: String },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    pub fn eval(&self, root: &Json) -> bool {
        match self {
            Predicate::Equals { path, value } => {
                path.first(root).and_then(scalar_string).as_deref() == Some(value.as_str())
            }
            Predicate::All(ps) => ps.iter().all(|p| p.eval(root)),
            Predicate::Any(ps) => ps.iter().any(|p| p.eval(root)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCondition {
    pub when: Predicate,
    pub message_path: Option<FieldPath>,
    pub custom_message: Option<String>,
}

impl FailureCondition {
    fn message(&self, root: &Json) -> String {
        if let Some(msg) = &self.custom_message {
            return msg.clone();
        }
        if let Some(msg) = self.message_path.as_ref().and_then(|p| p.first(root)).and_then(scalar_string) {
            return msg;
        }
        match &self.when {
            Predicate::Equals { path, value } => format!("{} is {}", path.as_str(), value),
            _ => "failure condition matched".to_string(),
        }
    }
}

/// Compiled success/failure predicates for one custom resource kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutConditions {
    success: Predicate,
    failure: Vec<FailureCondition>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConditions {
    #[serde(default)]
    success_conditions: Vec<RawCondition>,
    #[serde(default)]
    failure_conditions: Vec<RawCondition>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCondition {
    path: String,
    value: String,
    #[serde(default)]
    error_msg_path: Option<String>,
    #[serde(default)]
    custom_error_msg: Option<String>,
}

const READY_PATH: &str = r#"$.status.conditions[?(@.type == "Ready")].status"#;
const FAILED_PATH: &str = r#"$.status.conditions[?(@.type == "Failed")].status"#;
const FAILED_MESSAGE_PATH: &str = r#"$.status.conditions[?(@.type == "Failed")].message"#;

impl RolloutConditions {
    /// `Ready` condition true for success, `Failed` condition true for failure.
    pub fn defaults() -> Self {
        let path = |p: &str| FieldPath::parse(p).expect("built-in condition path parses");
        Self {
            success: Predicate::All(vec![Predicate::Equals { path: path(READY_PATH), value: "True".into() }]),
            failure: vec![FailureCondition {
                when: Predicate::Equals { path: path(FAILED_PATH), value: "True".into() },
                message_path: Some(path(FAILED_MESSAGE_PATH)),
                custom_message: None,
            }],
        }
    }

    /// Parse the annotation value: `true` for the defaults, or the JSON condition document.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("true") {
            return Ok(Self::defaults());
        }
        let doc: RawConditions = serde_json::from_str(raw).map_err(|e| format!("not valid JSON conditions: {}", e))?;
        if doc.success_conditions.is_empty() {
            return Err("success_conditions must contain at least one entry".to_string());
        }
        let success = doc
            .success_conditions
            .iter()
            .map(|c| {
                if c.error_msg_path.is_some() || c.custom_error_msg.is_some() {
                    return Err("error messages are only allowed on failure_conditions".to_string());
                }
                Ok(Predicate::Equals { path: FieldPath::parse(&c.path)?, value: c.value.clone() })
            })
            .collect::<Result<Vec<_>, String>>()?;
        let failure = doc
            .failure_conditions
            .iter()
            .map(|c| {
                Ok(FailureCondition {
                    when: Predicate::Equals { path: FieldPath::parse(&c.path)?, value: c.value.clone() },
                    message_path: c.error_msg_path.as_deref().map(FieldPath::parse).transpose()?,
                    custom_message: c.custom_error_msg.clone(),
                })
            })
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Self { success: Predicate::All(success), failure })
    }

    pub fn succeeded(&self, instance: &Json) -> bool {
        self.success.eval(instance)
    }

    pub fn failed(&self, instance: &Json) -> bool {
        self.failure.iter().any(|f| f.when.eval(instance))
    }

    /// Messages of every matching failure condition.
    pub fn failure_messages(&self, instance: &Json) -> Vec<String> {
        self.failure
            .iter()
            .filter(|f| f.when.eval(instance))
            .map(|f| f.message(instance))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cr(ready: &str) -> Json {
        json!({"status": {"conditions": [
            {"type": "Synced", "status": "True"},
            {"type": "Ready", "status": ready, "message": "waiting"}
        ]}})
    }

    #[test]
    fn parses_every_segment_form() {
        let p = FieldPath::parse(r#"$.status["conditions"][0].type"#).unwrap();
        assert_eq!(
            p.segments(),
            &[
                Segment::Key("status".into()),
                Segment::Key("conditions".into()),
                Segment::Index(0),
                Segment::Key("type".into())
            ]
        );
        let f = FieldPath::parse(r#"$.items[?(@.meta.kind == 'x')].v"#).unwrap();
        assert_eq!(
            f.segments()[1],
            Segment::Filter { key: vec!["meta".into(), "kind".into()], value: "x".into() }
        );
        assert!(FieldPath::parse("$").unwrap().segments().is_empty());
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["status.ready", "$.", "$[abc]", "$[0", r#"$[?(@.a != "b")]"#, "$.a*"] {
            assert!(FieldPath::parse(bad).is_err(), "{} should fail", bad);
        }
    }

    #[test]
    fn filter_selects_matching_element() {
        let p = FieldPath::parse(READY_PATH).unwrap();
        assert_eq!(p.first(&cr("False")), Some(&json!("False")));
        assert_eq!(p.first(&json!({"status": {}})), None);
    }

    #[test]
    fn defaults_track_ready_and_failed() {
        let c = RolloutConditions::parse("true").unwrap();
        assert!(c.succeeded(&cr("True")));
        assert!(!c.succeeded(&cr("False")));
        let failed = json!({"status": {"conditions": [
            {"type": "Failed", "status": "True", "message": "quota exceeded"}
        ]}});
        assert!(c.failed(&failed));
        assert_eq!(c.failure_messages(&failed), vec!["quota exceeded".to_string()]);
    }

    #[test]
    fn custom_document() {
        let c = RolloutConditions::parse(
            r#"{
                "success_conditions": [
                    {"path": "$.status.phase", "value": "Running"},
                    {"path": "$.status.replicas", "value": "3"}
                ],
                "failure_conditions": [
                    {"path": "$.status.phase", "value": "Error", "custom_error_msg": "controller gave up"}
                ]
            }"#,
        )
        .unwrap();
        assert!(c.succeeded(&json!({"status": {"phase": "Running", "replicas": 3}})));
        assert!(!c.succeeded(&json!({"status": {"phase": "Running", "replicas": 2}})));
        let broken = json!({"status": {"phase": "Error"}});
        assert!(c.failed(&broken));
        assert_eq!(c.failure_messages(&broken), vec!["controller gave up".to_string()]);
    }

    #[test]
    fn rejects_invalid_documents() {
        assert!(RolloutConditions::parse("false").is_err());
        assert!(RolloutConditions::parse(r#"{"success_conditions": []}"#).is_err());
        assert!(RolloutConditions::parse(r#"{"success_conditions": [{"path": "status", "value": "x"}]}"#).is_err());
        assert!(RolloutConditions::parse(r#"{"success_conditions": [{"path": "$.a", "value": "x"}], "extra": 1}"#).is_err());
    }
}
