use crate::config::Settings;

use super::open_binding;

pub fn cmd_readers(settings: &Settings) -> Result<(), cardstack::Error> {
    let binding = open_binding(settings)?;
    let readers = binding.list_readers()?;

    if readers.is_empty() {
        println!("No readers found");
        return Ok(());
    }

    println!("Found {} reader(s):\n", readers.len());
    for (i, reader) in readers.iter().enumerate() {
        println!("  {}: {}", i, reader);
    }
    Ok(())
}
