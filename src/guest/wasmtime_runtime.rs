//! `wasmtime`-backed adapter behind the [`GuestRuntime`] port. Resolves
//! exports by name and copies (ptr, len) regions into/out of guest linear
//! memory; the guest ABI's own semantics are out of scope here.

use wasmtime::{Engine, Instance, Memory, Module, Store, TypedFunc};

use super::runtime::{GuestInstance, GuestRuntime};
use crate::error::GuestError;

pub struct WasmtimeRuntime {
    engine: Engine,
}

impl WasmtimeRuntime {
    pub fn new() -> Self {
        Self { engine: Engine::default() }
    }
}

impl Default for WasmtimeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WasmtimeInstance {
    store: Store<()>,
    instance: Instance,
    memory: Memory,
    present_optional_exports: Vec<&'static str>,
}

impl GuestRuntime for WasmtimeRuntime {
    type Instance = WasmtimeInstance;

    fn instantiate(&self, wasm_bytes: &[u8]) -> Result<Self::Instance, GuestError> {
        let module = Module::new(&self.engine, wasm_bytes)
            .map_err(|e| GuestError::LoadFailed(e.to_string()))?;
        let mut store = Store::new(&self.engine, ());
        let instance = Instance::new(&mut store, &module, &[])
            .map_err(|e| GuestError::LoadFailed(e.to_string()))?;

        for required in super::contract::REQUIRED_EXPORTS {
            if instance.get_export(&mut store, required).is_none() {
                return Err(GuestError::MissingExport(required));
            }
        }

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or(GuestError::MissingExport("memory"))?;

        let present_optional_exports = super::contract::OPTIONAL_EXPORTS
            .iter()
            .copied()
            .filter(|name| instance.get_export(&mut store, name).is_some())
            .collect();

        Ok(WasmtimeInstance { store, instance, memory, present_optional_exports })
    }
}

impl WasmtimeInstance {
    fn typed<Params, Results>(
        &mut self,
        name: &'static str,
    ) -> Result<TypedFunc<Params, Results>, GuestError>
    where
        Params: wasmtime::WasmParams,
        Results: wasmtime::WasmResults,
    {
        self.instance
            .get_typed_func(&mut self.store, name)
            .map_err(|_| GuestError::MissingExport(name))
    }
}

impl GuestInstance for WasmtimeInstance {
    fn has_export(&self, name: &str) -> bool {
        self.present_optional_exports.contains(&name)
    }

    fn contract_version(&mut self) -> crate::error::Result<i32> {
        let f: TypedFunc<(), i32> = self.typed(super::contract::EXPORT_CONTRACT_VERSION)?;
        f.call(&mut self.store, ())
            .map_err(|e| GuestError::GuestTrapped(e.to_string()).into())
    }

    fn alloc(&mut self, len: i32) -> crate::error::Result<i32> {
        let f: TypedFunc<i32, i32> = self.typed(super::contract::EXPORT_ALLOC)?;
        f.call(&mut self.store, len)
            .map_err(|e| GuestError::GuestTrapped(e.to_string()).into())
    }

    fn free(&mut self, ptr: i32, len: i32) -> crate::error::Result<()> {
        let f: TypedFunc<(i32, i32), ()> = self.typed(super::contract::EXPORT_FREE)?;
        f.call(&mut self.store, (ptr, len))
            .map_err(|e| GuestError::GuestTrapped(e.to_string()).into())
    }

    fn write_guest_memory(&mut self, ptr: i32, data: &[u8]) -> crate::error::Result<()> {
        self.memory
            .write(&mut self.store, ptr as usize, data)
            .map_err(|e| GuestError::GuestTrapped(e.to_string()).into())
    }

    fn read_guest_memory(&self, ptr: i32, len: i32) -> crate::error::Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.memory
            .read(&self.store, ptr as usize, &mut buf)
            .map_err(|e| GuestError::GuestTrapped(e.to_string()))?;
        Ok(buf)
    }

    fn call_init(&mut self, api_version: i32, args_ptr: i32, args_len: i32) -> crate::error::Result<i32> {
        let f: TypedFunc<(i32, i32, i32), i32> = self.typed(super::contract::EXPORT_INIT)?;
        f.call(&mut self.store, (api_version, args_ptr, args_len))
            .map_err(|e| GuestError::GuestTrapped(e.to_string()).into())
    }

    fn call_microtask_step(&mut self, handle: i32, now_ms: i32) -> crate::error::Result<i64> {
        let f: TypedFunc<(i32, i32), i64> = self.typed(super::contract::EXPORT_MICROTASK_STEP)?;
        f.call(&mut self.store, (handle, now_ms))
            .map_err(|e| GuestError::GuestTrapped(e.to_string()).into())
    }

    fn call_on_gesture(
        &mut self,
        kind: i32,
        x: i32,
        y: i32,
        dx: i32,
        dy: i32,
        duration_ms: i32,
        now_ms: i32,
        flags: i32,
    ) -> crate::error::Result<()> {
        let f: TypedFunc<(i32, i32, i32, i32, i32, i32, i32, i32), ()> =
            self.typed(super::contract::EXPORT_ON_GESTURE)?;
        f.call(&mut self.store, (kind, x, y, dx, dy, duration_ms, now_ms, flags))
            .map_err(|e| GuestError::GuestTrapped(e.to_string()).into())
    }

    fn call_on_http_request(
        &mut self,
        req_id: i32,
        method: i32,
        uri_ptr: i32,
        uri_len: i32,
        body_ptr: i32,
        body_len: i32,
        content_len: i32,
        now_ms: i32,
        flags: i32,
    ) -> crate::error::Result<()> {
        let f: TypedFunc<(i32, i32, i32, i32, i32, i32, i32, i32, i32), ()> =
            self.typed(super::contract::EXPORT_ON_HTTP_REQUEST)?;
        f.call(
            &mut self.store,
            (req_id, method, uri_ptr, uri_len, body_ptr, body_len, content_len, now_ms, flags),
        )
        .map_err(|e| GuestError::GuestTrapped(e.to_string()).into())
    }

    fn call_on_wifi_event(&mut self, kind: i32, now_ms: i32, arg0: i32, arg1: i32) -> crate::error::Result<()> {
        let f: TypedFunc<(i32, i32, i32, i32), ()> = self.typed(super::contract::EXPORT_ON_WIFI_EVENT)?;
        f.call(&mut self.store, (kind, now_ms, arg0, arg1))
            .map_err(|e| GuestError::GuestTrapped(e.to_string()).into())
    }

    fn call_shutdown(&mut self) {
        if let Ok(f) = self.instance.get_typed_func::<(), ()>(&mut self.store, super::contract::EXPORT_SHUTDOWN) {
            let _ = f.call(&mut self.store, ());
        }
    }
}
