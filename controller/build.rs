fn main() -> anyhow::Result<()> {
    // Propagates the ESP-IDF cfg and link args; no-op on host builds.
    if std::env::var_os("CARGO_FEATURE_ESP32").is_some() {
        embuild::build::CfgArgs::output_propagated("ESP_IDF")?;
        embuild::build::LinkArgs::output_propagated("ESP_IDF")?;
    }
    Ok(())
}
