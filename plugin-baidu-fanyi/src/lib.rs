pub mod translator;

#[cfg(feature = "dylib")]
mod plugin {
    use crate::translator::BaiduFanyiTranslator;
    use macros::export_plugin;

    export_plugin!("Baidu", BaiduFanyiTranslator);
}
