//! WASM extension sandbox using Extism (wasmtime).
//!
//! Each worker owns one sandbox with configurable memory limits and
//! fuel-based execution limits. Module bytes are validated (size, magic
//! bytes, import namespaces) before they are instantiated.

use extism::{CurrentPlugin, Function, UserData, Val, PTR};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::descriptor::ExtensionKey;
use crate::error::ExtensionError;
use crate::fetcher::ExtensionCode;
use crate::locator::extension_path;
use crate::protocol::{BridgeMessage, FetchOptions, InitializeOptions, InitializeResult};
use crate::worker::{BridgeEndpoint, ExtensionRuntime, RuntimeFactory};

/// WASM magic bytes: `\0asm`
const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// Imports outside these namespaces are rejected.
const ALLOWED_IMPORT_NAMESPACES: &[&str] = &[
    "env",                    // Extism host functions
    "extism:host/env",        // Extism kernel
    "extism:host/user",       // bridge_fetch
    "wasi_snapshot_preview1", // WASI preview 1
    "wasi_unstable",          // Legacy WASI
];

/// Host function exposed to trusted extensions with the proxy capability.
pub const BRIDGE_FETCH: &str = "bridge_fetch";

// ─── Configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum memory in bytes (default: 64 MB).
    pub memory_limit: usize,
    /// Maximum fuel (instructions) per call (default: 50_000_000).
    pub fuel_limit: u64,
    /// Whether to enable WASI (default: false).
    pub wasi_enabled: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
            fuel_limit: 50_000_000,
            wasi_enabled: false,
        }
    }
}

impl SandboxConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self {
            memory_limit: std::env::var("EXTENSION_MEMORY_LIMIT_MB")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(64)
                * 1024
                * 1024,
            fuel_limit: std::env::var("EXTENSION_FUEL_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50_000_000),
            wasi_enabled: std::env::var("EXTENSION_WASI_ENABLED")
                .unwrap_or_default()
                .eq_ignore_ascii_case("true"),
        }
    }
}

// ─── Module validation ──────────────────────────────────────────────────

/// Check size, magic bytes and import namespaces of a module.
pub fn validate_module(bytes: &[u8], max_size: u64) -> Result<(), ExtensionError> {
    if bytes.len() as u64 > max_size {
        return Err(ExtensionError::WasmValidation(format!(
            "WASM binary too large: {} bytes (max: {} bytes)",
            bytes.len(),
            max_size
        )));
    }
    if bytes.len() < 4 || &bytes[..4] != WASM_MAGIC {
        return Err(ExtensionError::WasmValidation(
            "invalid WASM binary: magic bytes mismatch".into(),
        ));
    }
    validate_imports(bytes)
}

fn validate_imports(bytes: &[u8]) -> Result<(), ExtensionError> {
    use wasmparser::{Parser, Payload};

    for payload in Parser::new(0).parse_all(bytes) {
        let payload = payload
            .map_err(|e| ExtensionError::WasmValidation(format!("failed to parse WASM: {e}")))?;

        if let Payload::ImportSection(reader) = payload {
            for import in reader {
                let import = import.map_err(|e| {
                    ExtensionError::WasmValidation(format!("failed to read import: {e}"))
                })?;
                if !ALLOWED_IMPORT_NAMESPACES.contains(&import.module) {
                    return Err(ExtensionError::WasmValidation(format!(
                        "unauthorized import namespace: '{}' (function: '{}')",
                        import.module, import.name
                    )));
                }
            }
        }
    }
    Ok(())
}

// ─── Sandbox ────────────────────────────────────────────────────────────

/// A loaded extension module.
pub struct ExtensionSandbox {
    plugin: extism::Plugin,
    name: String,
}

impl std::fmt::Debug for ExtensionSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionSandbox")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ExtensionSandbox {
    /// Instantiate module bytes with the given host functions.
    ///
    /// Memory is capped in 64 KB pages; each call gets the configured fuel.
    pub fn load(
        wasm: Vec<u8>,
        config: &SandboxConfig,
        name: &str,
        functions: Vec<Function>,
    ) -> Result<Self, ExtensionError> {
        let manifest = extism::Manifest::new([extism::Wasm::data(wasm)])
            .with_memory_max((config.memory_limit / 65536) as u32);

        if config.wasi_enabled {
            tracing::warn!(extension = %name, "WASI enabled for extension");
        }

        let plugin = extism::PluginBuilder::new(manifest)
            .with_wasi(config.wasi_enabled)
            .with_fuel_limit(config.fuel_limit)
            .with_functions(functions)
            .build()
            .map_err(|e| ExtensionError::Sandbox(e.to_string()))?;

        Ok(Self {
            plugin,
            name: name.to_string(),
        })
    }

    /// Call an export with raw bytes, classifying fuel and memory failures.
    pub fn call(&mut self, function: &str, input: &[u8]) -> Result<Vec<u8>, ExtensionError> {
        self.plugin
            .call::<&[u8], Vec<u8>>(function, input)
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("fuel") {
                    ExtensionError::FuelExhausted(self.name.clone())
                } else if msg.contains("memory") {
                    ExtensionError::MemoryExceeded(self.name.clone())
                } else {
                    ExtensionError::Sandbox(msg)
                }
            })
    }

    pub fn call_json<I: Serialize, O: DeserializeOwned>(
        &mut self,
        function: &str,
        input: &I,
    ) -> Result<O, ExtensionError> {
        let bytes = serde_json::to_vec(input)?;
        let output = self.call(function, &bytes)?;
        Ok(serde_json::from_slice(&output)?)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.plugin.function_exists(name)
    }
}

// ─── Bridge host function ───────────────────────────────────────────────

#[derive(Deserialize)]
struct BridgeCall {
    url: String,
    #[serde(default)]
    options: FetchOptions,
}

/// `bridge_fetch(ptr) -> ptr`: input `{url, options}`, output the `RESULT` message.
fn bridge_fetch(
    plugin: &mut CurrentPlugin,
    inputs: &[Val],
    outputs: &mut [Val],
    user_data: UserData<BridgeEndpoint>,
) -> Result<(), extism::Error> {
    let input: String = plugin.memory_get_val(&inputs[0])?;
    let call: BridgeCall = serde_json::from_str(&input)?;

    let endpoint = user_data.get()?;
    let mut endpoint = endpoint
        .lock()
        .map_err(|_| extism::Error::msg("bridge endpoint poisoned"))?;
    let result = endpoint.fetch(call.url, call.options)?;

    let output = serde_json::to_string(&BridgeMessage::Result(result))?;
    plugin.memory_set_val(&mut outputs[0], output)?;
    Ok(())
}

// ─── Runtime ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct InitializeInput<'a> {
    key: &'a ExtensionKey,
    options: InitializeOptions,
}

/// Extism-backed [`ExtensionRuntime`].
pub struct SandboxRuntime {
    config: SandboxConfig,
    max_module_size: u64,
    bridge: Option<UserData<BridgeEndpoint>>,
    sandbox: Option<ExtensionSandbox>,
}

impl SandboxRuntime {
    pub fn new(config: SandboxConfig, max_module_size: u64, bridge: Option<BridgeEndpoint>) -> Self {
        Self {
            config,
            max_module_size,
            bridge: bridge.map(UserData::new),
            sandbox: None,
        }
    }

    fn host_functions(&self) -> Vec<Function> {
        self.bridge
            .iter()
            .map(|endpoint| {
                Function::new(BRIDGE_FETCH, [PTR], [PTR], endpoint.clone(), bridge_fetch)
            })
            .collect()
    }
}

impl ExtensionRuntime for SandboxRuntime {
    fn initialize(
        &mut self,
        key: &ExtensionKey,
        code: ExtensionCode,
        options: InitializeOptions,
    ) -> Result<InitializeResult, ExtensionError> {
        let wasm = match code {
            ExtensionCode::Module(bytes) => bytes,
            ExtensionCode::Reference(reference) => std::fs::read(extension_path(&reference)?)?,
        };
        validate_module(&wasm, self.max_module_size)?;

        let mut sandbox =
            ExtensionSandbox::load(wasm, &self.config, key.as_str(), self.host_functions())?;
        if !sandbox.has_function("initialize") {
            return Ok(InitializeResult::rejected(
                "module does not export `initialize`",
            ));
        }

        let result: InitializeResult =
            sandbox.call_json("initialize", &InitializeInput { key, options })?;
        self.sandbox = Some(sandbox);
        Ok(result)
    }

    fn validate(&mut self) -> Result<bool, ExtensionError> {
        let sandbox = self
            .sandbox
            .as_mut()
            .ok_or_else(|| ExtensionError::Validation("extension is not initialized".into()))?;
        if !sandbox.has_function("validate") {
            return Err(ExtensionError::Validation(
                "module does not export `validate`".into(),
            ));
        }
        sandbox.call_json("validate", &serde_json::Value::Null)
    }
}

/// Creates a [`SandboxRuntime`] per worker.
#[derive(Debug, Clone)]
pub struct SandboxRuntimeFactory {
    config: SandboxConfig,
    max_module_size: u64,
}

impl SandboxRuntimeFactory {
    pub fn new(config: SandboxConfig, max_module_size: u64) -> Self {
        Self {
            config,
            max_module_size,
        }
    }
}

impl RuntimeFactory for SandboxRuntimeFactory {
    fn create(
        &self,
        _key: &ExtensionKey,
        bridge: Option<BridgeEndpoint>,
    ) -> Box<dyn ExtensionRuntime> {
        Box::new(SandboxRuntime::new(
            self.config.clone(),
            self.max_module_size,
            bridge,
        ))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
