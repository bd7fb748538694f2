use crate::config::Settings;

use super::{open_binding, open_stack};

/// Print the stack the other commands would build, top first
pub fn cmd_layers(settings: &Settings) -> Result<(), cardstack::Error> {
    let binding = open_binding(settings)?;
    let stack = open_stack(binding.as_ref(), settings)?;

    println!("Reader: {}", stack.reader_name());
    println!("Stack ({} layers, application side first):\n", stack.len());
    for (position, layer) in stack.layers().iter().enumerate() {
        let marker = if layer.is_terminal() { " (terminal)" } else { "" };
        println!("  {}. {}{}", position, layer.identity(), marker);
    }
    Ok(())
}
