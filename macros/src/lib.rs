use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, LitStr, Token, Type};

struct ExportPluginInput {
    pub name: String,
    pub translator: Type,
}

impl Parse for ExportPluginInput {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name = input.parse::<LitStr>()?;

        input.parse::<Token![,]>()?;

        let typ = input.parse::<Type>()?;

        Ok(ExportPluginInput {
            name: name.value(),
            translator: typ,
        })
    }
}

/// 为实现了 `Translator + FromConfig` 的类型导出插件入口
///
/// ```ignore
/// export_plugin!("Baidu", BaiduTranslator);
/// ```
#[proc_macro]
pub fn export_plugin(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as ExportPluginInput);

    let name = input.name;
    let translator = input.translator;

    TokenStream::from(quote! {
mod __plugin_exports {
    use super::*;
    use lib::ffi::{free_c_string, into_c_string, read_c_str, PluginHandle, PluginManifest, PluginResponse};
    use lib::{EngineRequest, FromConfig, Language, Translator};
    use std::ffi::c_char;
    use std::sync::OnceLock;

    static RUNTIME: OnceLock<Option<tokio::runtime::Runtime>> = OnceLock::new();

    fn runtime() -> anyhow::Result<&'static tokio::runtime::Runtime> {
        RUNTIME
            .get_or_init(|| {
                tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .ok()
            })
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Failed to start plugin runtime"))
    }

    fn translator<'a>(handle: *mut PluginHandle) -> anyhow::Result<&'a #translator> {
        if handle.is_null() {
            anyhow::bail!("Null pointer received");
        }
        Ok(unsafe { &*(handle as *const #translator) })
    }

    fn create(config: *const c_char) -> anyhow::Result<*mut PluginHandle> {
        let config: serde_json::Value = serde_json::from_str(&unsafe { read_c_str(config) }?)?;
        let translator = runtime()?.block_on(<#translator as FromConfig>::new(config))?;
        Ok(Box::into_raw(Box::new(translator)) as *mut PluginHandle)
    }

    #[no_mangle]
    pub extern "C" fn plugin_create(config: *const c_char, out: *mut *mut PluginHandle) -> *mut c_char {
        if out.is_null() {
            return into_c_string("Null pointer received");
        }
        match create(config) {
            Ok(handle) => {
                unsafe { *out = handle };
                std::ptr::null_mut()
            }
            Err(e) => into_c_string(format!("Creation error: {:#}", e)),
        }
    }

    #[no_mangle]
    pub extern "C" fn plugin_manifest(handle: *mut PluginHandle) -> *mut c_char {
        let Ok(translator) = translator(handle) else {
            return std::ptr::null_mut();
        };
        let languages: Vec<Language> = match Translator::fixed_languages(translator) {
            Some(languages) => languages,
            None => Translator::language_mapping(translator).into_keys().collect(),
        };
        match serde_json::to_string(&PluginManifest::new(#name, &languages)) {
            Ok(json) => into_c_string(json),
            Err(_) => std::ptr::null_mut(),
        }
    }

    #[no_mangle]
    pub extern "C" fn plugin_translate(handle: *mut PluginHandle, request: *const c_char) -> *mut c_char {
        let result = (|| {
            let translator = translator(handle)?;
            let request: EngineRequest = serde_json::from_str(&unsafe { read_c_str(request) }?)?;
            runtime()?.block_on(Translator::translate(translator, &request))
        })();
        match serde_json::to_string(&PluginResponse::from_result(result)) {
            Ok(json) => into_c_string(json),
            Err(_) => std::ptr::null_mut(),
        }
    }

    #[no_mangle]
    pub extern "C" fn plugin_free_string(s: *mut c_char) {
        unsafe { free_c_string(s) }
    }

    #[no_mangle]
    pub extern "C" fn plugin_destroy(handle: *mut PluginHandle) {
        if !handle.is_null() {
            drop(unsafe { Box::from_raw(handle as *mut #translator) });
        }
    }
}
    })
}
