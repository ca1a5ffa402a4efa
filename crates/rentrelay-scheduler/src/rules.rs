//! Condition rule trees — who a schedule sends to.
//!
//! A tree is parsed once at schedule create/update time into a typed
//! enum, then evaluated either per-tenant (`matches`, the preview
//! path) or compiled into a SQL WHERE fragment (`sql_filter`, the
//! bulk path). Both forms come out of one shared walker parameterized
//! by a predicate builder, so they cannot silently diverge.
//!
//! Unknown fields and operators evaluate fail-open (leaf is true,
//! with a warning) unless strict parsing rejected them up front.

use chrono::{DateTime, Duration, Utc};
use rentrelay_core::error::{RentRelayError, Result};
use rentrelay_core::types::Tenant;
use serde_json::Value;

/// Logical combinator of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Comparison operator of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    NotContains,
    IsNull,
    IsNotNull,
    DaysAgo,
    DaysAhead,
}

impl CompareOp {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "eq" => CompareOp::Eq,
            "neq" => CompareOp::Neq,
            "gt" => CompareOp::Gt,
            "gte" => CompareOp::Gte,
            "lt" => CompareOp::Lt,
            "lte" => CompareOp::Lte,
            "in" => CompareOp::In,
            "not_in" => CompareOp::NotIn,
            "contains" => CompareOp::Contains,
            "not_contains" => CompareOp::NotContains,
            "is_null" => CompareOp::IsNull,
            "is_not_null" => CompareOp::IsNotNull,
            "days_ago" => CompareOp::DaysAgo,
            "days_ahead" => CompareOp::DaysAhead,
            _ => return None,
        })
    }
}

/// One node of a rule tree.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleNode {
    /// `{field, operator, value}`. Field and operator are kept as
    /// written so unknown ones can fail open at evaluation time.
    Leaf {
        field: String,
        operator: String,
        value: Value,
    },
    /// `{field: "group", conditions: {...}}` — nested tree.
    Group(RuleTree),
}

/// A parsed rule tree. An empty `rules` list matches everyone.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleTree {
    pub operator: LogicalOp,
    pub rules: Vec<RuleNode>,
}

// ─── Field allow-list ──────────────────────────────────────

/// Storage class of a tenant column, used to coerce rule values the
/// same way for both evaluation forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Boolean,
    DateTime,
}

/// A rule-addressable tenant field.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Every field a rule may reference; names double as tenant columns.
pub const FIELDS: &[FieldDef] = &[
    FieldDef { name: "name", kind: FieldKind::Text },
    FieldDef { name: "contact", kind: FieldKind::Text },
    FieldDef { name: "building", kind: FieldKind::Text },
    FieldDef { name: "tenant_type", kind: FieldKind::Text },
    FieldDef { name: "rent_amount", kind: FieldKind::Integer },
    FieldDef { name: "due_date", kind: FieldKind::Text },
    FieldDef { name: "active", kind: FieldKind::Boolean },
    FieldDef { name: "is_current_month_rent_paid", kind: FieldKind::Boolean },
    FieldDef { name: "last_payment_date", kind: FieldKind::DateTime },
    FieldDef { name: "late_fee_applicable", kind: FieldKind::Boolean },
    FieldDef { name: "sms_opt_in_status", kind: FieldKind::Text },
    FieldDef { name: "notes", kind: FieldKind::Text },
    FieldDef { name: "created_at", kind: FieldKind::DateTime },
    FieldDef { name: "updated_at", kind: FieldKind::DateTime },
];

fn field_def(name: &str) -> Option<&'static FieldDef> {
    FIELDS.iter().find(|f| f.name == name)
}

// ─── Parsing ──────────────────────────────────────

impl RuleTree {
    /// Parse a JSON condition object. In strict mode unknown fields,
    /// operators, and malformed leaves are rejected; otherwise they
    /// are kept and will evaluate fail-open.
    pub fn parse(value: &Value, strict: bool) -> Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            RentRelayError::Validation("conditions must be a JSON object".into())
        })?;

        let operator = match obj.get("operator").and_then(|v| v.as_str()) {
            None => LogicalOp::And,
            Some(op) => match op.to_ascii_lowercase().as_str() {
                "and" => LogicalOp::And,
                "or" => LogicalOp::Or,
                other => {
                    if strict {
                        return Err(RentRelayError::Validation(format!(
                            "unknown logical operator '{other}' (expected and/or)"
                        )));
                    }
                    tracing::warn!("Unknown logical operator '{other}', treating as 'and'");
                    LogicalOp::And
                }
            },
        };

        let mut rules = Vec::new();
        if let Some(raw_rules) = obj.get("rules").and_then(|v| v.as_array()) {
            for raw in raw_rules {
                rules.push(Self::parse_node(raw, strict)?);
            }
        }

        Ok(RuleTree { operator, rules })
    }

    /// Parse optional conditions: JSON null (or absent) means "no
    /// conditions", i.e. every active tenant.
    pub fn parse_opt(value: Option<&Value>, strict: bool) -> Result<Option<Self>> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(v) => Ok(Some(Self::parse(v, strict)?)),
        }
    }

    fn parse_node(raw: &Value, strict: bool) -> Result<RuleNode> {
        let obj = raw.as_object().ok_or_else(|| {
            RentRelayError::Validation("each rule must be a JSON object".into())
        })?;

        let field = obj
            .get("field")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        // Nested group: {field: "group", conditions: {...}}
        if field == "group" {
            let nested = obj.get("conditions").unwrap_or(&Value::Null);
            if nested.is_null() {
                return Ok(RuleNode::Group(RuleTree {
                    operator: LogicalOp::And,
                    rules: Vec::new(),
                }));
            }
            return Ok(RuleNode::Group(Self::parse(nested, strict)?));
        }

        let operator = obj
            .get("operator")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        if strict {
            if field_def(&field).is_none() {
                return Err(RentRelayError::Validation(format!(
                    "unknown rule field '{field}'"
                )));
            }
            if CompareOp::parse(&operator).is_none() {
                return Err(RentRelayError::Validation(format!(
                    "unknown rule operator '{operator}'"
                )));
            }
        }

        Ok(RuleNode::Leaf {
            field,
            operator,
            value: obj.get("value").cloned().unwrap_or(Value::Null),
        })
    }

    /// Serialize back to the wire JSON shape for persistence.
    pub fn to_value(&self) -> Value {
        let operator = match self.operator {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
        };
        let rules: Vec<Value> = self
            .rules
            .iter()
            .map(|node| match node {
                RuleNode::Leaf { field, operator, value } => serde_json::json!({
                    "field": field,
                    "operator": operator,
                    "value": value,
                }),
                RuleNode::Group(tree) => serde_json::json!({
                    "field": "group",
                    "conditions": tree.to_value(),
                }),
            })
            .collect();
        serde_json::json!({ "operator": operator, "rules": rules })
    }

    /// Human-readable summary for previews ("Building equals A AND ...").
    pub fn summarize(&self) -> String {
        if self.rules.is_empty() {
            return "All active tenants".into();
        }
        let joiner = match self.operator {
            LogicalOp::And => " AND ",
            LogicalOp::Or => " OR ",
        };
        let parts: Vec<String> = self
            .rules
            .iter()
            .map(|node| match node {
                RuleNode::Group(tree) => format!("({})", tree.summarize()),
                RuleNode::Leaf { field, operator, value } => {
                    let pretty = field.replace('_', " ");
                    match operator.as_str() {
                        "eq" => format!("{pretty} equals {value}"),
                        "neq" => format!("{pretty} not equals {value}"),
                        "is_null" => format!("{pretty} is empty"),
                        "is_not_null" => format!("{pretty} is not empty"),
                        op => format!("{pretty} {op} {value}"),
                    }
                }
            })
            .collect();
        parts.join(joiner)
    }
}

// ─── Shared walker ──────────────────────────────────────

/// Builds one predicate form out of a rule tree. Implemented by the
/// per-tenant boolean evaluator and the SQL fragment compiler.
trait PredicateBuilder {
    type Pred;

    /// Vacuously-true predicate: empty trees and fail-open leaves.
    fn always(&mut self) -> Self::Pred;
    fn leaf(&mut self, field: &FieldDef, op: CompareOp, value: &Value) -> Self::Pred;
    fn combine(&mut self, op: LogicalOp, preds: Vec<Self::Pred>) -> Self::Pred;
}

fn walk<B: PredicateBuilder>(tree: &RuleTree, builder: &mut B) -> B::Pred {
    let mut preds = Vec::with_capacity(tree.rules.len());
    for node in &tree.rules {
        let pred = match node {
            RuleNode::Group(nested) => walk(nested, builder),
            RuleNode::Leaf { field, operator, value } => {
                match (field_def(field), CompareOp::parse(operator)) {
                    (Some(def), Some(op)) => builder.leaf(def, op, value),
                    (None, _) => {
                        tracing::warn!("Unknown rule field '{field}', evaluating as true");
                        builder.always()
                    }
                    (_, None) => {
                        tracing::warn!("Unknown rule operator '{operator}', evaluating as true");
                        builder.always()
                    }
                }
            }
        };
        preds.push(pred);
    }
    if preds.is_empty() {
        builder.always()
    } else {
        builder.combine(tree.operator, preds)
    }
}

// ─── Value coercion (shared by both forms) ──────────────────────────

/// A rule value coerced to a field's storage class. Coercion failures
/// make the leaf fail open in both forms.
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Text(String),
    Int(i64),
    Bool(bool),
    Time(DateTime<Utc>),
}

fn coerce(kind: FieldKind, value: &Value) -> Option<Scalar> {
    match kind {
        FieldKind::Text => match value {
            Value::String(s) => Some(Scalar::Text(s.clone())),
            Value::Number(n) => Some(Scalar::Text(n.to_string())),
            Value::Bool(b) => Some(Scalar::Text(b.to_string())),
            _ => None,
        },
        FieldKind::Integer => match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(Scalar::Int),
        FieldKind::Boolean => match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|i| i != 0),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
        .map(Scalar::Bool),
        FieldKind::DateTime => value.as_str().and_then(parse_datetime).map(Scalar::Time),
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    // Bare date → midnight UTC
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| DateTime::from_naive_utc_and_offset(d.and_time(chrono::NaiveTime::MIN), Utc))
}

/// Coerce a JSON list (or bare literal) for in/not_in. Elements that
/// fail coercion are dropped from the set in both forms.
fn coerce_list(kind: FieldKind, value: &Value) -> Vec<Scalar> {
    match value {
        Value::Array(items) => items.iter().filter_map(|v| coerce(kind, v)).collect(),
        other => coerce(kind, other).into_iter().collect(),
    }
}

/// String form used by contains — mirrors SQLite's CAST(col AS TEXT)
/// for the way we store each kind.
fn scalar_text(s: &Scalar) -> String {
    match s {
        Scalar::Text(t) => t.clone(),
        Scalar::Int(i) => i.to_string(),
        Scalar::Bool(b) => if *b { "1".into() } else { "0".into() },
        Scalar::Time(t) => t.to_rfc3339(),
    }
}

// ─── Boolean form (per-tenant) ──────────────────────────────────────

/// A tenant field value; `None` inside means SQL NULL.
enum FieldValue {
    Text(Option<String>),
    Int(Option<i64>),
    Bool(bool),
    Time(Option<DateTime<Utc>>),
}

fn tenant_value(tenant: &Tenant, name: &str) -> FieldValue {
    match name {
        "name" => FieldValue::Text(Some(tenant.name.clone())),
        "contact" => FieldValue::Text(Some(tenant.contact.clone())),
        "building" => FieldValue::Text(tenant.building.clone()),
        "tenant_type" => FieldValue::Text(Some(tenant.tenant_type.clone())),
        "rent_amount" => FieldValue::Int(tenant.rent_amount),
        "due_date" => FieldValue::Text(tenant.due_date.clone()),
        "active" => FieldValue::Bool(tenant.active),
        "is_current_month_rent_paid" => FieldValue::Bool(tenant.is_current_month_rent_paid),
        "last_payment_date" => FieldValue::Time(tenant.last_payment_date),
        "late_fee_applicable" => FieldValue::Bool(tenant.late_fee_applicable),
        "sms_opt_in_status" => FieldValue::Text(Some(tenant.sms_opt_in_status.clone())),
        "notes" => FieldValue::Text(tenant.notes.clone()),
        "created_at" => FieldValue::Time(Some(tenant.created_at)),
        "updated_at" => FieldValue::Time(Some(tenant.updated_at)),
        // Unreachable: the walker only passes allow-listed fields.
        _ => FieldValue::Text(None),
    }
}

struct MatchBuilder<'a> {
    tenant: &'a Tenant,
    now: DateTime<Utc>,
}

impl MatchBuilder<'_> {
    /// Current value as a Scalar; None means NULL.
    fn current(&self, field: &FieldDef) -> Option<Scalar> {
        match tenant_value(self.tenant, field.name) {
            FieldValue::Text(v) => v.map(Scalar::Text),
            FieldValue::Int(v) => v.map(Scalar::Int),
            FieldValue::Bool(v) => Some(Scalar::Bool(v)),
            FieldValue::Time(v) => v.map(Scalar::Time),
        }
    }
}

fn scalar_cmp(a: &Scalar, b: &Scalar) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Scalar::Text(x), Scalar::Text(y)) => Some(x.cmp(y)),
        (Scalar::Int(x), Scalar::Int(y)) => Some(x.cmp(y)),
        (Scalar::Bool(x), Scalar::Bool(y)) => Some((*x as i64).cmp(&(*y as i64))),
        (Scalar::Time(x), Scalar::Time(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

impl PredicateBuilder for MatchBuilder<'_> {
    type Pred = bool;

    fn always(&mut self) -> bool {
        true
    }

    fn combine(&mut self, op: LogicalOp, preds: Vec<bool>) -> bool {
        match op {
            LogicalOp::And => preds.into_iter().all(|p| p),
            LogicalOp::Or => preds.into_iter().any(|p| p),
        }
    }

    fn leaf(&mut self, field: &FieldDef, op: CompareOp, value: &Value) -> bool {
        let current = self.current(field);

        match op {
            CompareOp::IsNull => return current.is_none(),
            CompareOp::IsNotNull => return current.is_some(),
            _ => {}
        }

        // NULL fields fail every ordinary comparison, mirroring SQL.
        let current = match current {
            Some(c) => c,
            None => return false,
        };

        match op {
            CompareOp::Eq | CompareOp::Neq | CompareOp::Gt | CompareOp::Gte
            | CompareOp::Lt | CompareOp::Lte => {
                let expected = match coerce(field.kind, value) {
                    Some(e) => e,
                    None => {
                        tracing::warn!(
                            "Rule value {value} not comparable to field '{}', evaluating as true",
                            field.name
                        );
                        return true;
                    }
                };
                let ord = match scalar_cmp(&current, &expected) {
                    Some(o) => o,
                    None => return true,
                };
                match op {
                    CompareOp::Eq => ord.is_eq(),
                    CompareOp::Neq => ord.is_ne(),
                    CompareOp::Gt => ord.is_gt(),
                    CompareOp::Gte => ord.is_ge(),
                    CompareOp::Lt => ord.is_lt(),
                    CompareOp::Lte => ord.is_le(),
                    _ => true,
                }
            }
            CompareOp::In => coerce_list(field.kind, value).contains(&current),
            CompareOp::NotIn => {
                let list = coerce_list(field.kind, value);
                !list.contains(&current)
            }
            CompareOp::Contains | CompareOp::NotContains => {
                // ASCII-case-insensitive, mirroring SQLite's default
                // LIKE collation used by the SQL form.
                let needle = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }
                .to_ascii_lowercase();
                let haystack = scalar_text(&current).to_ascii_lowercase();
                let found = haystack.contains(&needle);
                if op == CompareOp::Contains { found } else { !found }
            }
            CompareOp::DaysAgo | CompareOp::DaysAhead => {
                let days = match value.as_i64().or_else(|| {
                    value.as_str().and_then(|s| s.trim().parse().ok())
                }) {
                    Some(d) => d,
                    None => {
                        tracing::warn!("days_ago/days_ahead needs an integer value, evaluating as true");
                        return true;
                    }
                };
                let field_time = match current {
                    Scalar::Time(t) => t,
                    _ => {
                        tracing::warn!(
                            "days_ago/days_ahead on non-date field '{}', evaluating as true",
                            field.name
                        );
                        return true;
                    }
                };
                let target = if op == CompareOp::DaysAgo {
                    self.now - Duration::days(days)
                } else {
                    self.now + Duration::days(days)
                };
                // Exact calendar-day match, not a range.
                field_time.date_naive() == target.date_naive()
            }
            CompareOp::IsNull | CompareOp::IsNotNull => true, // handled above
        }
    }
}

// ─── SQL form (bulk selection) ──────────────────────────────────────

struct SqlBuilder {
    params: Vec<rusqlite::types::Value>,
    now: DateTime<Utc>,
}

impl SqlBuilder {
    fn bind(&mut self, scalar: Scalar) -> &'static str {
        let param = match scalar {
            Scalar::Text(t) => rusqlite::types::Value::Text(t),
            Scalar::Int(i) => rusqlite::types::Value::Integer(i),
            Scalar::Bool(b) => rusqlite::types::Value::Integer(b as i64),
            Scalar::Time(t) => rusqlite::types::Value::Text(t.to_rfc3339()),
        };
        self.params.push(param);
        "?"
    }
}

/// Escape LIKE wildcards so contains is a literal substring test.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

impl PredicateBuilder for SqlBuilder {
    type Pred = String;

    fn always(&mut self) -> String {
        "1=1".into()
    }

    fn combine(&mut self, op: LogicalOp, preds: Vec<String>) -> String {
        let joiner = match op {
            LogicalOp::And => " AND ",
            LogicalOp::Or => " OR ",
        };
        format!("({})", preds.join(joiner))
    }

    fn leaf(&mut self, field: &FieldDef, op: CompareOp, value: &Value) -> String {
        let col = field.name;

        match op {
            CompareOp::IsNull => return format!("{col} IS NULL"),
            CompareOp::IsNotNull => return format!("{col} IS NOT NULL"),
            _ => {}
        }

        match op {
            CompareOp::Eq | CompareOp::Neq | CompareOp::Gt | CompareOp::Gte
            | CompareOp::Lt | CompareOp::Lte => {
                let expected = match coerce(field.kind, value) {
                    Some(e) => e,
                    None => {
                        tracing::warn!(
                            "Rule value {value} not comparable to field '{col}', evaluating as true"
                        );
                        return self.always();
                    }
                };
                let sql_op = match op {
                    CompareOp::Eq => "=",
                    CompareOp::Neq => "!=",
                    CompareOp::Gt => ">",
                    CompareOp::Gte => ">=",
                    CompareOp::Lt => "<",
                    CompareOp::Lte => "<=",
                    _ => "=",
                };
                let placeholder = self.bind(expected);
                format!("{col} {sql_op} {placeholder}")
            }
            CompareOp::In | CompareOp::NotIn => {
                let list = coerce_list(field.kind, value);
                if list.is_empty() {
                    // IN () matches nothing; NOT IN () matches every
                    // non-NULL value. Mirror the boolean form.
                    return match op {
                        CompareOp::In => "0=1".into(),
                        _ => format!("{col} IS NOT NULL"),
                    };
                }
                let placeholders: Vec<&str> = list.into_iter().map(|s| self.bind(s)).collect();
                let keyword = if op == CompareOp::In { "IN" } else { "NOT IN" };
                format!("{col} {keyword} ({})", placeholders.join(", "))
            }
            CompareOp::Contains | CompareOp::NotContains => {
                let needle = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                self.params
                    .push(rusqlite::types::Value::Text(escape_like(&needle)));
                // SQLite's default LIKE is ASCII-case-insensitive; the
                // boolean form lowercases both sides to match.
                let keyword = if op == CompareOp::Contains { "LIKE" } else { "NOT LIKE" };
                format!("CAST({col} AS TEXT) {keyword} '%' || ? || '%' ESCAPE '\\'")
            }
            CompareOp::DaysAgo | CompareOp::DaysAhead => {
                let days = match value.as_i64().or_else(|| {
                    value.as_str().and_then(|s| s.trim().parse().ok())
                }) {
                    Some(d) => d,
                    None => {
                        tracing::warn!("days_ago/days_ahead needs an integer value, evaluating as true");
                        return self.always();
                    }
                };
                if field.kind != FieldKind::DateTime {
                    tracing::warn!(
                        "days_ago/days_ahead on non-date field '{col}', evaluating as true"
                    );
                    return self.always();
                }
                let target = if op == CompareOp::DaysAgo {
                    self.now - Duration::days(days)
                } else {
                    self.now + Duration::days(days)
                };
                self.params.push(rusqlite::types::Value::Text(
                    target.date_naive().format("%Y-%m-%d").to_string(),
                ));
                format!("date({col}) = ?")
            }
            CompareOp::IsNull | CompareOp::IsNotNull => self.always(), // handled above
        }
    }
}

impl RuleTree {
    /// Pure per-tenant evaluation. Order-independent, no side effects.
    pub fn matches(&self, tenant: &Tenant, now: DateTime<Utc>) -> bool {
        let mut builder = MatchBuilder { tenant, now };
        walk(self, &mut builder)
    }

    /// Compile into a SQL WHERE fragment over the tenants table plus
    /// its positional parameters. Produces the same membership as
    /// `matches` applied to every row.
    pub fn sql_filter(&self, now: DateTime<Utc>) -> (String, Vec<rusqlite::types::Value>) {
        let mut builder = SqlBuilder { params: Vec::new(), now };
        let clause = walk(self, &mut builder);
        (clause, builder.params)
    }
}
