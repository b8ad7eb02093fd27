use display_agent::{Compositor, Sway};

fn main() {
    let program = std::env::args().nth(1).unwrap_or_else(|| "swaymsg".to_string());
    let sway = Sway::new(program);

    let outputs = sway.outputs().expect("Failed to query sway outputs");
    println!("=== {} outputs detected ===\n", outputs.len());
    for output in &outputs {
        println!("  {} ({} {})", output.name, output.make, output.model);
        println!("    serial: {}", output.serial);
        println!("    enabled: {}", output.active);
        println!("    power: {}", output.power);
        match output.scale {
            Some(scale) => println!("    scale: {}", scale),
            None => println!("    scale: -"),
        }
        match output.transform {
            Some(transform) => println!("    transform: {}", transform),
            None => println!("    transform: -"),
        }
        println!("    modes:");
        for mode in &output.modes {
            let current = if output.current_mode.as_ref() == Some(mode) {
                " [CURRENT]"
            } else {
                ""
            };
            println!("      {}{}", mode, current);
        }
        println!();
    }
}
