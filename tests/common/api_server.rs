//! In-memory Kubernetes API server.
//!
//! Serves get, list, create, replace, merge and apply patches, and delete
//! over a map of JSON objects keyed by collection path. Every request is
//! logged so tests can assert on the order of writes, and failures can be
//! injected per method and path.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// One request seen by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: String,
    pub path: String,
}

impl Call {
    pub fn is_write(&self) -> bool {
        self.method != "GET"
    }
}

#[derive(Debug)]
struct Failure {
    method: String,
    path: String,
    code: u16,
    remaining: u32,
}

#[derive(Debug, Default)]
struct State {
    /// collection path -> name -> object
    objects: BTreeMap<String, BTreeMap<String, Value>>,
    calls: Vec<Call>,
    failures: Vec<Failure>,
    version: u64,
}

/// Where a request path points
struct Target {
    collection: String,
    name: Option<String>,
}

impl Target {
    /// `/api/v1/...` or `/apis/<group>/<version>/...`, optionally scoped by
    /// `namespaces/<ns>`, then `<plural>[/<name>[/<subresource>]]`
    fn parse(path: &str) -> Self {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let prefix_len = if segments.first() == Some(&"api") { 2 } else { 3 };
        let (prefix, rest) = segments.split_at(prefix_len.min(segments.len()));
        let scope_len = if rest.first() == Some(&"namespaces") && rest.len() > 2 {
            3
        } else {
            1
        };
        let (collection, tail) = rest.split_at(scope_len.min(rest.len()));
        Self {
            collection: format!("/{}", [prefix, collection].concat().join("/")),
            name: tail.first().map(|s| (*s).to_string()),
        }
    }
}

fn status(code: u16, reason: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(code).set_body_json(json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code,
    }))
}

/// RFC 7386 merge of `patch` into `target`
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn resource_version(object: &Value) -> Option<&str> {
    object["metadata"]["resourceVersion"].as_str()
}

impl State {
    fn stamp(&mut self, object: &mut Value, name: &str) {
        self.version += 1;
        let metadata = &mut object["metadata"];
        metadata["resourceVersion"] = json!(self.version.to_string());
        if metadata["uid"].is_null() {
            metadata["uid"] = json!(format!("uid-{name}"));
        }
    }

    fn store(&mut self, collection: &str, name: &str, mut object: Value) -> Value {
        self.stamp(&mut object, name);
        self.objects
            .entry(collection.to_string())
            .or_default()
            .insert(name.to_string(), object.clone());
        object
    }

    fn lookup(&self, collection: &str, name: &str) -> Option<&Value> {
        self.objects.get(collection).and_then(|c| c.get(name))
    }

    fn injected_failure(&mut self, method: &str, path: &str) -> Option<u16> {
        let failure = self
            .failures
            .iter_mut()
            .find(|f| f.remaining > 0 && f.method == method && f.path == path)?;
        failure.remaining -= 1;
        Some(failure.code)
    }

    fn handle(&mut self, request: &Request) -> ResponseTemplate {
        let method = request.method.to_string();
        let path = request.url.path().to_string();
        self.calls.push(Call {
            method: method.clone(),
            path: path.clone(),
        });
        if let Some(code) = self.injected_failure(&method, &path) {
            let reason = if code == 409 { "Conflict" } else { "InternalError" };
            return status(code, reason, "injected failure");
        }

        let target = Target::parse(&path);
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let content_type = request
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        match (method.as_str(), target.name) {
            ("GET", None) => {
                let items: Vec<Value> = self
                    .objects
                    .get(&target.collection)
                    .map(|c| c.values().cloned().collect())
                    .unwrap_or_default();
                ResponseTemplate::new(200).set_body_json(json!({
                    "apiVersion": "v1",
                    "kind": "List",
                    "metadata": { "resourceVersion": self.version.to_string() },
                    "items": items,
                }))
            }
            ("GET", Some(name)) => match self.lookup(&target.collection, &name) {
                Some(object) => ResponseTemplate::new(200).set_body_json(object),
                None => status(404, "NotFound", &format!("{name} not found")),
            },
            ("POST", None) => {
                let name = body["metadata"]["name"].as_str().unwrap_or_default().to_string();
                if self.lookup(&target.collection, &name).is_some() {
                    return status(409, "AlreadyExists", &format!("{name} already exists"));
                }
                let created = self.store(&target.collection, &name, body);
                ResponseTemplate::new(201).set_body_json(created)
            }
            ("PUT", Some(name)) => {
                let Some(current) = self.lookup(&target.collection, &name) else {
                    return status(404, "NotFound", &format!("{name} not found"));
                };
                if resource_version(&body) != resource_version(current) {
                    return status(409, "Conflict", "the object has been modified");
                }
                let replaced = self.store(&target.collection, &name, body);
                ResponseTemplate::new(200).set_body_json(replaced)
            }
            ("PATCH", Some(name)) => {
                let current = self.lookup(&target.collection, &name).cloned();
                let mut object = match current {
                    Some(current) => {
                        let expected = resource_version(&body);
                        if expected.is_some() && expected != resource_version(&current) {
                            return status(409, "Conflict", "the object has been modified");
                        }
                        current
                    }
                    None if content_type.starts_with("application/apply-patch") => json!({}),
                    None => return status(404, "NotFound", &format!("{name} not found")),
                };
                merge(&mut object, &body);
                let patched = self.store(&target.collection, &name, object);
                ResponseTemplate::new(200).set_body_json(patched)
            }
            ("DELETE", Some(name)) => {
                let removed = self
                    .objects
                    .get_mut(&target.collection)
                    .and_then(|c| c.remove(&name));
                match removed {
                    Some(object) => ResponseTemplate::new(200).set_body_json(object),
                    None => status(404, "NotFound", &format!("{name} not found")),
                }
            }
            _ => status(405, "MethodNotAllowed", "unsupported request"),
        }
    }
}

struct Responder(Arc<Mutex<State>>);

impl Respond for Responder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.0.lock().expect("api state lock").handle(request)
    }
}

pub struct FakeApiServer {
    server: MockServer,
    state: Arc<Mutex<State>>,
}

impl FakeApiServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(State::default()));
        Mock::given(any())
            .respond_with(Responder(Arc::clone(&state)))
            .mount(&server)
            .await;
        Self { server, state }
    }

    pub fn client(&self) -> kube::Client {
        // Same provider the operator installs at startup
        let _ = rustls::crypto::ring::default_provider().install_default();
        let config = kube::Config::new(self.server.uri().parse().expect("server uri"));
        kube::Client::try_from(config).expect("client")
    }

    /// Store `object` in `collection` as if it had been created earlier
    pub fn seed(&self, collection: &str, object: &impl Serialize) {
        let object = serde_json::to_value(object).expect("serializable object");
        let name = object["metadata"]["name"]
            .as_str()
            .expect("object name")
            .to_string();
        self.state
            .lock()
            .expect("api state lock")
            .store(collection, &name, object);
    }

    pub fn object(&self, collection: &str, name: &str) -> Option<Value> {
        self.state
            .lock()
            .expect("api state lock")
            .lookup(collection, name)
            .cloned()
    }

    /// Answer the next `times` requests matching `method` and `path` with `code`
    pub fn fail(&self, method: &str, path: &str, code: u16, times: u32) {
        self.state.lock().expect("api state lock").failures.push(Failure {
            method: method.to_string(),
            path: path.to_string(),
            code,
            remaining: times,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().expect("api state lock").calls.clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().expect("api state lock").calls.clear();
    }
}
