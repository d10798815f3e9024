// The wire format is what a template precompiler emits: a JSON envelope `{id, meta, block}`
// whose block is itself a JSON string holding `{symbols, hasEval, statements}`. The
// envelope and the block header are plain serde structs. Statements and expressions are
// heterogeneous JSON arrays led by a numeric tag, so they are decoded by hand from
// serde_json::Value into the typed trees below. Anything that does not match a known
// shape is reported as CompileError::Malformed naming the offending part.

//! Template wire format.

use crate::core::{CompileError, CompileResult};
use serde::Deserialize;
use serde_json::Value as Json;
use std::rc::Rc;

/// Statement tags.
pub mod statement {
    pub const TEXT: u64 = 0;
    pub const APPEND: u64 = 1;
    pub const COMMENT: u64 = 2;
    pub const MODIFIER: u64 = 3;
    pub const BLOCK: u64 = 4;
    pub const COMPONENT: u64 = 5;
    pub const OPEN_ELEMENT: u64 = 6;
    pub const FLUSH_ELEMENT: u64 = 7;
    pub const CLOSE_ELEMENT: u64 = 8;
    pub const STATIC_ATTR: u64 = 9;
    pub const DYNAMIC_ATTR: u64 = 10;
    pub const YIELD: u64 = 11;
    pub const PARTIAL: u64 = 12;
    pub const TRUSTING_ATTR: u64 = 15;
    pub const DEBUGGER: u64 = 16;
    pub const CLIENT_SIDE: u64 = 17;
}

/// Expression tags.
pub mod expression {
    pub const UNKNOWN: u64 = 18;
    pub const GET: u64 = 19;
    pub const MAYBE_LOCAL: u64 = 20;
    pub const HAS_BLOCK: u64 = 22;
    pub const HAS_BLOCK_PARAMS: u64 = 23;
    pub const UNDEFINED: u64 = 24;
    pub const HELPER: u64 = 25;
    pub const CONCAT: u64 = 26;
}

/// The JSON envelope of a precompiled template.
#[derive(Debug, Deserialize)]
pub struct SerializedTemplate {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub meta: Json,
    pub block: BlockSource,
}

/// The block is normally a JSON string; an inline object is accepted too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum BlockSource {
    Encoded(String),
    Inline(SerializedBlock),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedBlock {
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub has_eval: bool,
    pub statements: Vec<Json>,
}

impl BlockSource {
    pub fn decode(self) -> CompileResult<SerializedBlock> {
        match self {
            BlockSource::Encoded(text) => Ok(serde_json::from_str(&text)?),
            BlockSource::Inline(block) => Ok(block),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
}

/// Named arguments in source order.
pub type Hash = Vec<(Rc<str>, Expression)>;

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    /// A bare name: a helper if one is registered, else a property of self.
    Unknown(Rc<str>),
    Get { symbol: usize, path: Vec<Rc<str>> },
    /// A path whose head may be a partial's local.
    MaybeLocal(Vec<Rc<str>>),
    HasBlock(usize),
    HasBlockParams(usize),
    Helper {
        name: Rc<str>,
        params: Vec<Expression>,
        hash: Hash,
    },
    Concat(Vec<Expression>),
}

/// A nested block and the symbol slots of its block parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InlineBlock {
    pub statements: Vec<Statement>,
    pub parameters: Vec<usize>,
}

/// Statements only the layout scanner produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientSide {
    OpenComponentElement(Rc<str>),
    DidCreateElement,
    SetComponentAttrs(bool),
    DidRenderLayout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Text(Rc<str>),
    Append {
        value: Expression,
        trusting: bool,
    },
    Comment(Rc<str>),
    Modifier {
        name: Rc<str>,
        params: Vec<Expression>,
        hash: Hash,
    },
    Block {
        name: Rc<str>,
        params: Vec<Expression>,
        hash: Hash,
        template: Option<InlineBlock>,
        inverse: Option<InlineBlock>,
    },
    Component {
        tag: Rc<str>,
        attrs: Vec<Statement>,
        args: Hash,
        block: Option<InlineBlock>,
    },
    OpenElement(Rc<str>),
    FlushElement,
    CloseElement,
    StaticAttr {
        name: Rc<str>,
        value: Rc<str>,
        namespace: Option<Rc<str>>,
    },
    DynamicAttr {
        name: Rc<str>,
        value: Expression,
        namespace: Option<Rc<str>>,
        trusting: bool,
    },
    Yield {
        to: usize,
        params: Vec<Expression>,
    },
    Partial {
        name: Expression,
        eval_info: Vec<usize>,
    },
    Debugger {
        eval_info: Vec<usize>,
    },
    ClientSide(ClientSide),
}

fn tuple<'a>(json: &'a Json, kind: &'static str) -> CompileResult<(u64, &'a [Json])> {
    let items = json
        .as_array()
        .ok_or_else(|| CompileError::malformed(kind, format!("expected an array, got {json}")))?;
    let tag = items
        .first()
        .and_then(Json::as_u64)
        .ok_or_else(|| CompileError::malformed(kind, "missing numeric tag"))?;
    Ok((tag, &items[1..]))
}

fn field<'a>(items: &'a [Json], index: usize, kind: &'static str) -> CompileResult<&'a Json> {
    items
        .get(index)
        .ok_or_else(|| CompileError::malformed(kind, format!("missing operand {}", index + 1)))
}

fn string(json: &Json, kind: &'static str) -> CompileResult<Rc<str>> {
    json.as_str()
        .map(Rc::from)
        .ok_or_else(|| CompileError::malformed(kind, format!("expected a string, got {json}")))
}

fn optional_string(json: Option<&Json>, kind: &'static str) -> CompileResult<Option<Rc<str>>> {
    match json {
        None | Some(Json::Null) => Ok(None),
        Some(json) => string(json, kind).map(Some),
    }
}

fn index(json: &Json, kind: &'static str) -> CompileResult<usize> {
    json.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| CompileError::malformed(kind, format!("expected a slot, got {json}")))
}

fn indices(json: &Json, kind: &'static str) -> CompileResult<Vec<usize>> {
    match json {
        Json::Null => Ok(Vec::new()),
        Json::Array(items) => items.iter().map(|item| index(item, kind)).collect(),
        other => Err(CompileError::malformed(kind, format!("expected slots, got {other}"))),
    }
}

fn path(json: &Json, kind: &'static str) -> CompileResult<Vec<Rc<str>>> {
    match json {
        Json::Null => Ok(Vec::new()),
        Json::Array(items) => items.iter().map(|item| string(item, kind)).collect(),
        other => Err(CompileError::malformed(kind, format!("expected a path, got {other}"))),
    }
}

fn params(json: Option<&Json>) -> CompileResult<Vec<Expression>> {
    match json {
        None | Some(Json::Null) => Ok(Vec::new()),
        Some(Json::Array(items)) => items.iter().map(Expression::decode).collect(),
        Some(other) => Err(CompileError::malformed(
            "params",
            format!("expected an array, got {other}"),
        )),
    }
}

fn hash(json: Option<&Json>) -> CompileResult<Hash> {
    let pair = match json {
        None | Some(Json::Null) => return Ok(Vec::new()),
        Some(Json::Array(pair)) if pair.len() == 2 => pair,
        Some(other) => {
            return Err(CompileError::malformed(
                "hash",
                format!("expected [names, values], got {other}"),
            ))
        }
    };
    let names = path(&pair[0], "hash")?;
    let values = params(Some(&pair[1]))?;
    if names.len() != values.len() {
        return Err(CompileError::malformed(
            "hash",
            format!("{} names for {} values", names.len(), values.len()),
        ));
    }
    Ok(names.into_iter().zip(values).collect())
}

fn inline_block(json: Option<&Json>) -> CompileResult<Option<InlineBlock>> {
    let object = match json {
        None | Some(Json::Null) => return Ok(None),
        Some(Json::Object(object)) => object,
        Some(other) => {
            return Err(CompileError::malformed(
                "block",
                format!("expected an object, got {other}"),
            ))
        }
    };
    let statements = match object.get("statements") {
        Some(Json::Array(items)) => items
            .iter()
            .map(Statement::decode)
            .collect::<CompileResult<_>>()?,
        _ => return Err(CompileError::malformed("block", "missing statements")),
    };
    let parameters = match object.get("parameters") {
        Some(json) => indices(json, "block parameters")?,
        None => Vec::new(),
    };
    Ok(Some(InlineBlock {
        statements,
        parameters,
    }))
}

impl Expression {
    pub fn decode(json: &Json) -> CompileResult<Expression> {
        let items = match json {
            Json::Array(_) => tuple(json, "expression")?,
            Json::Null => return Ok(Expression::Literal(Literal::Null)),
            Json::Bool(b) => return Ok(Expression::Literal(Literal::Bool(*b))),
            Json::Number(n) => {
                return Ok(Expression::Literal(Literal::Number(n.as_f64().unwrap_or(f64::NAN))))
            }
            Json::String(s) => return Ok(Expression::Literal(Literal::String(Rc::from(s.as_str())))),
            Json::Object(_) => {
                return Err(CompileError::malformed(
                    "expression",
                    "objects are not literals",
                ))
            }
        };
        let kind = "expression";
        let (tag, operands) = items;
        Ok(match tag {
            expression::UNKNOWN => Expression::Unknown(string(field(operands, 0, kind)?, kind)?),
            expression::GET => Expression::Get {
                symbol: index(field(operands, 0, kind)?, kind)?,
                path: path(operands.get(1).unwrap_or(&Json::Null), kind)?,
            },
            expression::MAYBE_LOCAL => {
                let path = path(field(operands, 0, kind)?, kind)?;
                if path.is_empty() {
                    return Err(CompileError::malformed(kind, "empty maybe-local path"));
                }
                Expression::MaybeLocal(path)
            }
            expression::HAS_BLOCK => Expression::HasBlock(index(field(operands, 0, kind)?, kind)?),
            expression::HAS_BLOCK_PARAMS => {
                Expression::HasBlockParams(index(field(operands, 0, kind)?, kind)?)
            }
            expression::UNDEFINED => Expression::Literal(Literal::Undefined),
            expression::HELPER => Expression::Helper {
                name: string(field(operands, 0, kind)?, kind)?,
                params: params(operands.get(1))?,
                hash: hash(operands.get(2))?,
            },
            expression::CONCAT => Expression::Concat(params(operands.first())?),
            other => {
                return Err(CompileError::malformed(
                    kind,
                    format!("unknown expression tag {other}"),
                ))
            }
        })
    }
}

impl Statement {
    pub fn decode(json: &Json) -> CompileResult<Statement> {
        let kind = "statement";
        let (tag, operands) = tuple(json, kind)?;
        Ok(match tag {
            statement::TEXT => Statement::Text(string(field(operands, 0, kind)?, kind)?),
            statement::APPEND => Statement::Append {
                value: Expression::decode(field(operands, 0, kind)?)?,
                trusting: operands.get(1).and_then(Json::as_bool).unwrap_or(false),
            },
            statement::COMMENT => Statement::Comment(string(field(operands, 0, kind)?, kind)?),
            statement::MODIFIER => Statement::Modifier {
                name: string(field(operands, 0, kind)?, kind)?,
                params: params(operands.get(1))?,
                hash: hash(operands.get(2))?,
            },
            statement::BLOCK => Statement::Block {
                name: string(field(operands, 0, kind)?, kind)?,
                params: params(operands.get(1))?,
                hash: hash(operands.get(2))?,
                template: inline_block(operands.get(3))?,
                inverse: inline_block(operands.get(4))?,
            },
            statement::COMPONENT => {
                let attrs = match operands.get(1) {
                    None | Some(Json::Null) => Vec::new(),
                    Some(Json::Array(items)) => items
                        .iter()
                        .map(Statement::decode)
                        .collect::<CompileResult<_>>()?,
                    Some(other) => {
                        return Err(CompileError::malformed(
                            "component",
                            format!("expected attributes, got {other}"),
                        ))
                    }
                };
                Statement::Component {
                    tag: string(field(operands, 0, kind)?, kind)?,
                    attrs,
                    args: hash(operands.get(2))?,
                    block: inline_block(operands.get(3))?,
                }
            }
            statement::OPEN_ELEMENT => {
                Statement::OpenElement(string(field(operands, 0, kind)?, kind)?)
            }
            statement::FLUSH_ELEMENT => Statement::FlushElement,
            statement::CLOSE_ELEMENT => Statement::CloseElement,
            statement::STATIC_ATTR => Statement::StaticAttr {
                name: string(field(operands, 0, kind)?, kind)?,
                value: string(field(operands, 1, kind)?, kind)?,
                namespace: optional_string(operands.get(2), kind)?,
            },
            statement::DYNAMIC_ATTR | statement::TRUSTING_ATTR => Statement::DynamicAttr {
                name: string(field(operands, 0, kind)?, kind)?,
                value: Expression::decode(field(operands, 1, kind)?)?,
                namespace: optional_string(operands.get(2), kind)?,
                trusting: tag == statement::TRUSTING_ATTR,
            },
            statement::YIELD => Statement::Yield {
                to: index(field(operands, 0, kind)?, kind)?,
                params: params(operands.get(1))?,
            },
            statement::PARTIAL => Statement::Partial {
                name: Expression::decode(field(operands, 0, kind)?)?,
                eval_info: indices(operands.get(1).unwrap_or(&Json::Null), kind)?,
            },
            statement::DEBUGGER => Statement::Debugger {
                eval_info: indices(operands.first().unwrap_or(&Json::Null), kind)?,
            },
            statement::CLIENT_SIDE => Statement::ClientSide(ClientSide::decode(operands)?),
            other => {
                return Err(CompileError::malformed(
                    kind,
                    format!("unknown statement tag {other}"),
                ))
            }
        })
    }
}

impl ClientSide {
    fn decode(operands: &[Json]) -> CompileResult<ClientSide> {
        let kind = "client-side statement";
        let subop = field(operands, 0, kind)?
            .as_u64()
            .ok_or_else(|| CompileError::malformed(kind, "missing sub-opcode"))?;
        Ok(match subop {
            0 => ClientSide::OpenComponentElement(string(field(operands, 1, kind)?, kind)?),
            1 => ClientSide::DidCreateElement,
            2 => ClientSide::SetComponentAttrs(
                operands.get(1).and_then(Json::as_bool).unwrap_or(false),
            ),
            3 => ClientSide::DidRenderLayout,
            other => {
                return Err(CompileError::malformed(
                    kind,
                    format!("unknown sub-opcode {other}"),
                ))
            }
        })
    }
}

/// Decode a statement list.
pub fn decode_statements(statements: &[Json]) -> CompileResult<Vec<Statement>> {
    statements.iter().map(Statement::decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_block_statement() {
        let stmt = Statement::decode(&json!([
            4, "if", [[19, 1, ["ok"]]], null,
            {"statements": [[0, "yes"]], "parameters": []},
            {"statements": [[0, "no"]]}
        ]))
        .unwrap();
        let Statement::Block { name, params, template, inverse, .. } = stmt else {
            panic!("expected a block");
        };
        assert_eq!(&*name, "if");
        assert_eq!(
            params,
            vec![Expression::Get { symbol: 1, path: vec![Rc::from("ok")] }]
        );
        assert_eq!(template.unwrap().statements, vec![Statement::Text(Rc::from("yes"))]);
        assert!(inverse.is_some());
    }

    #[test]
    fn test_decode_literals_and_hash() {
        let stmt = Statement::decode(&json!([3, "on", ["click", 1.5, null], [["capture"], [true]]]))
            .unwrap();
        let Statement::Modifier { params, hash, .. } = stmt else {
            panic!("expected a modifier");
        };
        assert_eq!(params[1], Expression::Literal(Literal::Number(1.5)));
        assert_eq!(params[2], Expression::Literal(Literal::Null));
        assert_eq!(&*hash[0].0, "capture");
    }

    #[test]
    fn test_trusting_attr_decodes_as_dynamic() {
        let stmt = Statement::decode(&json!([15, "src", [18, "url"], null])).unwrap();
        assert!(matches!(stmt, Statement::DynamicAttr { trusting: true, .. }));
    }

    #[test]
    fn test_malformed_input_is_reported() {
        assert!(matches!(
            Statement::decode(&json!([99])),
            Err(CompileError::Malformed { .. })
        ));
        assert!(Statement::decode(&json!({"not": "a tuple"})).is_err());
        assert!(Expression::decode(&json!([25])).is_err());
        assert!(Expression::decode(&json!([18, "a"])).is_ok());
    }

    #[test]
    fn test_envelope_accepts_encoded_block() {
        let template: SerializedTemplate = serde_json::from_value(json!({
            "id": "greeting",
            "meta": {},
            "block": "{\"symbols\":[\"@name\"],\"hasEval\":false,\"statements\":[[0,\"hi\"]]}"
        }))
        .unwrap();
        let block = template.block.decode().unwrap();
        assert_eq!(block.symbols, vec!["@name"]);
        assert_eq!(block.statements.len(), 1);
    }
}
