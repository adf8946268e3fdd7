use std::path::Path;

use flowgrid_core::CostModelConfig;

pub fn init(output: &str) -> anyhow::Result<()> {
    let path = Path::new(output);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    std::fs::write(path, CostModelConfig::default().to_toml_string()?)?;
    println!("✓ Generated {}", path.display());
    Ok(())
}

pub fn check(path: &str) -> anyhow::Result<()> {
    let config = CostModelConfig::from_file(Path::new(path))?;
    println!("✓ {path} is valid");
    println!("  Unscheduled cost:   {}", config.unscheduled_cost);
    println!("  Preemption margin:  {}", config.preemption_margin);
    println!("  Arcs per machine:   {}", config.max_multi_arcs_per_machine);
    println!("  Max flattened cost: {}", config.max_flattened_cost());
    Ok(())
}
