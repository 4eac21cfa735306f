//! Koji hub client over XML-RPC
//!
//! Production builds are scratch builds from the upstream git URL. Calls that
//! change hub state carry the session id, key and an increasing call number.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event as XmlEvent;
use tracing::{debug, info};

use super::{BackendError, BuildBackend, BuildInfo, BuildRequest, BuildSubmission, KOJI_BACKEND};

const TASK_FILES_BASE: &str = "https://kojipkgs.fedoraproject.org/work/tasks";

/// One XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlRpcValue {
    Int(i64),
    Bool(bool),
    Double(f64),
    Str(String),
    Struct(BTreeMap<String, XmlRpcValue>),
    Array(Vec<XmlRpcValue>),
    Nil,
}

impl XmlRpcValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            XmlRpcValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            XmlRpcValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn get(&self, member: &str) -> Option<&XmlRpcValue> {
        match self {
            XmlRpcValue::Struct(members) => members.get(member),
            _ => None,
        }
    }

    fn write(&self, out: &mut String) {
        out.push_str("<value>");
        match self {
            XmlRpcValue::Int(value) => out.push_str(&format!("<int>{value}</int>")),
            XmlRpcValue::Bool(value) => {
                out.push_str(&format!("<boolean>{}</boolean>", u8::from(*value)))
            }
            XmlRpcValue::Double(value) => out.push_str(&format!("<double>{value}</double>")),
            XmlRpcValue::Str(value) => out.push_str(&format!("<string>{}</string>", escape(value))),
            XmlRpcValue::Struct(members) => {
                out.push_str("<struct>");
                for (name, value) in members {
                    out.push_str(&format!("<member><name>{}</name>", escape(name)));
                    value.write(out);
                    out.push_str("</member>");
                }
                out.push_str("</struct>");
            }
            XmlRpcValue::Array(items) => {
                out.push_str("<array><data>");
                for item in items {
                    item.write(out);
                }
                out.push_str("</data></array>");
            }
            XmlRpcValue::Nil => out.push_str("<nil/>"),
        }
        out.push_str("</value>");
    }
}

/// Serializes a `methodCall` document.
pub fn method_call(method: &str, params: &[XmlRpcValue]) -> String {
    let mut out = format!(
        "<?xml version=\"1.0\"?><methodCall><methodName>{}</methodName><params>",
        escape(method)
    );
    for param in params {
        out.push_str("<param>");
        param.write(&mut out);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>");
    out
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    Text(String),
}

fn invalid(message: impl Into<String>) -> BackendError {
    BackendError::InvalidResponse {
        backend: KOJI_BACKEND,
        message: message.into(),
    }
}

fn tokenize(body: &str) -> Result<Vec<Token>, BackendError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut tokens = Vec::new();
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(tag)) => tokens.push(Token::Open(
                String::from_utf8_lossy(tag.name().as_ref()).into_owned(),
            )),
            Ok(XmlEvent::End(tag)) => tokens.push(Token::Close(
                String::from_utf8_lossy(tag.name().as_ref()).into_owned(),
            )),
            Ok(XmlEvent::Empty(tag)) => {
                let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
                tokens.push(Token::Open(name.clone()));
                tokens.push(Token::Close(name));
            }
            Ok(XmlEvent::Text(text)) => {
                let text = text.unescape().map_err(|err| invalid(err.to_string()))?;
                tokens.push(Token::Text(text.into_owned()));
            }
            Ok(XmlEvent::CData(data)) => tokens.push(Token::Text(
                String::from_utf8_lossy(&data.into_inner()).into_owned(),
            )),
            Ok(XmlEvent::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(invalid(err.to_string())),
        }
    }
    Ok(tokens)
}

struct ValueParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ValueParser {
    fn next(&mut self) -> Result<Token, BackendError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| invalid("truncated XML-RPC document"))?;
        self.pos += 1;
        Ok(token)
    }

    fn open(&mut self, name: &str) -> Result<(), BackendError> {
        match self.next()? {
            Token::Open(tag) if tag == name => Ok(()),
            other => Err(invalid(format!("expected <{name}>, got {other:?}"))),
        }
    }

    fn close(&mut self, name: &str) -> Result<(), BackendError> {
        match self.next()? {
            Token::Close(tag) if tag == name => Ok(()),
            other => Err(invalid(format!("expected </{name}>, got {other:?}"))),
        }
    }

    /// Text content up to and including `</name>`; empty elements give "".
    fn text(&mut self, name: &str) -> Result<String, BackendError> {
        match self.next()? {
            Token::Close(tag) if tag == name => Ok(String::new()),
            Token::Text(text) => {
                self.close(name)?;
                Ok(text)
            }
            other => Err(invalid(format!("expected text in <{name}>, got {other:?}"))),
        }
    }

    /// Parses the inside of a `<value>` whose opening tag was consumed.
    fn value(&mut self) -> Result<XmlRpcValue, BackendError> {
        let tag = match self.next()? {
            Token::Close(tag) if tag == "value" => return Ok(XmlRpcValue::Str(String::new())),
            Token::Text(text) => {
                self.close("value")?;
                return Ok(XmlRpcValue::Str(text));
            }
            Token::Open(tag) => tag,
            other => return Err(invalid(format!("unexpected {other:?} in <value>"))),
        };

        let value = match tag.as_str() {
            "int" | "i4" | "i8" => {
                let text = self.text(&tag)?;
                XmlRpcValue::Int(
                    text.trim()
                        .parse()
                        .map_err(|_| invalid(format!("bad integer {text:?}")))?,
                )
            }
            "boolean" => XmlRpcValue::Bool(self.text(&tag)?.trim() == "1"),
            "double" => {
                let text = self.text(&tag)?;
                XmlRpcValue::Double(
                    text.trim()
                        .parse()
                        .map_err(|_| invalid(format!("bad double {text:?}")))?,
                )
            }
            "nil" => {
                self.close("nil")?;
                XmlRpcValue::Nil
            }
            "struct" => {
                let mut members = BTreeMap::new();
                loop {
                    match self.next()? {
                        Token::Close(end) if end == "struct" => break,
                        Token::Open(member) if member == "member" => {
                            self.open("name")?;
                            let name = self.text("name")?;
                            self.open("value")?;
                            let value = self.value()?;
                            self.close("member")?;
                            members.insert(name, value);
                        }
                        other => return Err(invalid(format!("unexpected {other:?} in <struct>"))),
                    }
                }
                XmlRpcValue::Struct(members)
            }
            "array" => {
                self.open("data")?;
                let mut items = Vec::new();
                loop {
                    match self.next()? {
                        Token::Close(end) if end == "data" => break,
                        Token::Open(open) if open == "value" => items.push(self.value()?),
                        other => return Err(invalid(format!("unexpected {other:?} in <array>"))),
                    }
                }
                self.close("array")?;
                XmlRpcValue::Array(items)
            }
            // string, dateTime.iso8601 and base64 are all kept as text
            _ => XmlRpcValue::Str(self.text(&tag)?),
        };
        self.close("value")?;
        Ok(value)
    }
}

/// Parses a `methodResponse`; a fault becomes [`BackendError::Fault`].
pub fn parse_response(body: &str) -> Result<XmlRpcValue, BackendError> {
    let mut parser = ValueParser {
        tokens: tokenize(body)?,
        pos: 0,
    };
    parser.open("methodResponse")?;
    match parser.next()? {
        Token::Open(tag) if tag == "params" => {
            parser.open("param")?;
            parser.open("value")?;
            parser.value()
        }
        Token::Open(tag) if tag == "fault" => {
            parser.open("value")?;
            let fault = parser.value()?;
            Err(BackendError::Fault {
                backend: KOJI_BACKEND,
                code: fault.get("faultCode").and_then(XmlRpcValue::as_i64).unwrap_or_default(),
                message: fault
                    .get("faultString")
                    .and_then(XmlRpcValue::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        }
        other => Err(invalid(format!("unexpected {other:?} in <methodResponse>"))),
    }
}

/// Task state name for a Koji task state code.
pub fn task_state_name(state: i64) -> &'static str {
    match state {
        0 | 4 => "pending",
        1 => "running",
        2 => "succeeded",
        3 => "canceled",
        5 => "failed",
        _ => "unknown",
    }
}

#[derive(Debug)]
pub struct KojiClient {
    http: reqwest::Client,
    hub_url: String,
    web_url: String,
    session: Option<(String, String)>,
    callnum: AtomicU64,
}

impl KojiClient {
    pub fn new(
        http: reqwest::Client,
        hub_url: String,
        web_url: String,
        session_id: Option<String>,
        session_key: Option<String>,
    ) -> Self {
        Self {
            http,
            hub_url,
            web_url: web_url.trim_end_matches('/').to_string(),
            session: session_id.zip(session_key),
            callnum: AtomicU64::new(0),
        }
    }

    async fn call(
        &self,
        method: &str,
        params: &[XmlRpcValue],
        authenticated: bool,
    ) -> Result<XmlRpcValue, BackendError> {
        let mut builder = self
            .http
            .post(&self.hub_url)
            .header("Content-Type", "text/xml")
            .body(method_call(method, params));
        if authenticated {
            let (id, key) = self
                .session
                .as_ref()
                .ok_or(BackendError::MissingCredentials {
                    backend: KOJI_BACKEND,
                })?;
            let callnum = self.callnum.fetch_add(1, Ordering::SeqCst).to_string();
            builder = builder.query(&[
                ("session-id", id.as_str()),
                ("session-key", key.as_str()),
                ("callnum", callnum.as_str()),
            ]);
        }

        debug!(method, "Calling Koji hub");
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Api {
                backend: KOJI_BACKEND,
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }
        parse_response(&body)
    }
}

#[async_trait]
impl BuildBackend for KojiClient {
    fn name(&self) -> &'static str {
        KOJI_BACKEND
    }

    /// Submits a scratch build of `committish` into the first requested target.
    async fn submit_build(&self, request: &BuildRequest) -> Result<BuildSubmission, BackendError> {
        let target = request.chroots.first().ok_or_else(|| BackendError::InvalidRequest {
            backend: KOJI_BACKEND,
            message: "no build target".to_string(),
        })?;
        let source = format!("git+{}#{}", request.clone_url, request.committish);
        let options = BTreeMap::from([("scratch".to_string(), XmlRpcValue::Bool(true))]);
        let task = self
            .call(
                "build",
                &[
                    XmlRpcValue::Str(source),
                    XmlRpcValue::Str(target.clone()),
                    XmlRpcValue::Struct(options),
                ],
                true,
            )
            .await?;
        let task_id = task
            .as_i64()
            .ok_or_else(|| invalid(format!("build returned {task:?}")))?
            .to_string();
        info!(task_id = %task_id, target = %target, "Koji build submitted");
        Ok(BuildSubmission {
            web_url: self.web_url("", "", &task_id),
            build_id: task_id,
        })
    }

    async fn get_build_info(&self, build_id: &str) -> Result<BuildInfo, BackendError> {
        let task_id: i64 = build_id.parse().map_err(|_| BackendError::InvalidRequest {
            backend: KOJI_BACKEND,
            message: format!("task id {build_id:?} is not numeric"),
        })?;
        let task = self
            .call("getTaskInfo", &[XmlRpcValue::Int(task_id)], false)
            .await?;
        let state = task
            .get("state")
            .and_then(XmlRpcValue::as_i64)
            .ok_or_else(|| invalid(format!("task {build_id} has no state")))?;
        Ok(BuildInfo {
            build_id: build_id.to_string(),
            state: task_state_name(state).to_string(),
            owner: task
                .get("owner")
                .and_then(XmlRpcValue::as_i64)
                .map(|owner| owner.to_string())
                .unwrap_or_default(),
            project_name: String::new(),
            pkg: None,
        })
    }

    fn web_url(&self, _owner: &str, _project: &str, build_id: &str) -> String {
        format!("{}/taskinfo?taskID={}", self.web_url, build_id)
    }

    /// `build.log` of the `buildArch` task; `build_id` names that child task.
    fn build_logs_url(
        &self,
        _owner: &str,
        _project: &str,
        _target: &str,
        build_id: &str,
        _pkg: Option<&str>,
    ) -> Option<String> {
        let id: u64 = build_id.parse().ok()?;
        Some(format!("{}/{}/{}/build.log", TASK_FILES_BASE, id % 10000, id))
    }
}
