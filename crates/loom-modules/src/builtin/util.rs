//! `util` module: stateless helpers grouped in namespaces

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::error::ModuleResult;
use crate::module::{Args, CallContext, ModuleConfig, ModuleInfo, NativeModule};
use crate::schema::{MethodSchema, ModuleSchema, NamespaceSchema};

pub struct UtilModule;

impl NativeModule for UtilModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("util", semver::Version::new(1, 0, 0))
            .describe("Identifiers, clocks and encodings")
            .author("loom")
    }

    fn schema(&self) -> ModuleSchema {
        ModuleSchema::new()
            .namespace(
                NamespaceSchema::new("id")
                    .method(MethodSchema::new("uuid").describe("Random UUID v4").returns("string")),
            )
            .namespace(
                NamespaceSchema::new("time")
                    .method(
                        MethodSchema::new("now")
                            .describe("Milliseconds since the Unix epoch")
                            .returns("number"),
                    )
                    .method(
                        MethodSchema::new("iso")
                            .describe("Current UTC time as RFC 3339")
                            .returns("string"),
                    ),
            )
            .namespace(
                NamespaceSchema::new("encoding")
                    .method(
                        MethodSchema::new("base64Encode")
                            .param("text", "string")
                            .returns("string"),
                    )
                    .method(
                        MethodSchema::new("base64Decode")
                            .param("encoded", "string")
                            .returns("string"),
                    ),
            )
    }

    fn init(&self, _config: &ModuleConfig) -> ModuleResult<()> {
        Ok(())
    }

    fn call(&self, _ctx: &CallContext<'_>, method: &str, args: Vec<Value>) -> ModuleResult<Value> {
        let args = Args::new("util", method, &args);

        match method {
            "id.uuid" => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
            "time.now" => Ok(Value::from(chrono::Utc::now().timestamp_millis())),
            "time.iso" => Ok(Value::String(chrono::Utc::now().to_rfc3339())),
            "encoding.base64Encode" => {
                let text = args.str(0, "text")?;
                Ok(Value::String(STANDARD.encode(text)))
            }
            "encoding.base64Decode" => {
                let encoded = args.str(0, "encoded")?;
                let bytes = STANDARD
                    .decode(encoded)
                    .map_err(|e| args.error(format!("invalid base64: {}", e)))?;
                String::from_utf8(bytes)
                    .map(Value::String)
                    .map_err(|_| args.error("decoded bytes are not UTF-8"))
            }
            _ => Err(args.unknown_method()),
        }
    }
}
