use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // Create config template if it doesn't exist
    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| "./".to_string());
    let template_path = Path::new(&out_dir).join("../../../tssync.template.toml");

    let template = r#"# tssync Configuration Template
# Copy this file to 'tssync.toml' and adjust the values

# Buffer thresholds as "enough_blocks,low_blocks,max_size_mb"
buffer = "10,5,8"

# Force the reference PID instead of learning it from the stream
# pcr_pid = 256
"#;

    let _ = fs::write(template_path, template);
    println!("cargo:rerun-if-changed=build.rs");
}
