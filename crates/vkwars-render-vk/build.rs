fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    #[cfg(feature = "compile-shaders")]
    compile::run();
}

#[cfg(feature = "compile-shaders")]
mod compile {
    use std::{env, fs, path::PathBuf};

    const SOURCES: [(&str, shaderc::ShaderKind); 2] = [
        ("ui.vert", shaderc::ShaderKind::Vertex),
        ("ui.frag", shaderc::ShaderKind::Fragment),
    ];

    pub fn run() {
        let out = PathBuf::from(env::var("OUT_DIR").unwrap());
        let dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("shaders");

        let comp = shaderc::Compiler::new().unwrap();
        let mut opts = shaderc::CompileOptions::new().unwrap();
        // matches the instance's API_VERSION
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_2 as u32,
        );
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        for (name, kind) in SOURCES {
            let path = dir.join(name);
            println!("cargo:rerun-if-changed={}", path.display());
            let src = fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));
            let spv = comp
                .compile_into_spirv(&src, kind, name, "main", Some(&opts))
                .unwrap_or_else(|e| panic!("compiling {name}: {e}"));
            fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
        }
    }
}
