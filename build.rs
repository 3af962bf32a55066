use embed_manifest::manifest::{DpiAwareness, ExecutionLevel};
use embed_manifest::{embed_manifest, new_manifest};

fn main() {
    if std::env::var_os("CARGO_CFG_WINDOWS").is_some() {
        // Driver installers elevate themselves, the checker never needs to
        embed_manifest(
            new_manifest("DriverScout.Checker")
                .version(0, 4, 0, 0)
                .requested_execution_level(ExecutionLevel::AsInvoker)
                .dpi_awareness(DpiAwareness::PerMonitorV2),
        )
        .expect("Failed to embed manifest");
    }
    println!("cargo:rerun-if-changed=build.rs");
}
