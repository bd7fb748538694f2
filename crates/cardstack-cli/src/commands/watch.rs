use std::time::Duration;

use cardstack::{MonitorCommand, ReaderEvent, ReaderMonitor};

use crate::config::Settings;

use super::open_binding;

const POLL: Duration = Duration::from_millis(250);

/// Print reader events until `count` have been seen (or forever)
pub fn cmd_watch(settings: &Settings, count: Option<usize>) -> Result<(), cardstack::Error> {
    let binding = open_binding(settings)?;
    let (events, commands) = ReaderMonitor::spawn(binding, POLL);

    println!("Watching readers (Ctrl-C to stop)\n");

    let mut seen = 0;
    for event in events.iter() {
        match event {
            ReaderEvent::ReaderAvailable { reader_name } => println!("+ reader  {}", reader_name),
            ReaderEvent::ReaderUnavailable { reader_name } => println!("- reader  {}", reader_name),
            ReaderEvent::CardInserted { reader_name, atr } => {
                println!("+ card    {} (ATR {})", reader_name, hex::encode_upper(&atr))
            }
            ReaderEvent::CardRemoved { reader_name } => println!("- card    {}", reader_name),
            ReaderEvent::Error { message } => eprintln!("! error   {}", message),
        }

        seen += 1;
        if count.is_some_and(|count| seen >= count) {
            break;
        }
    }

    let _ = commands.send(MonitorCommand::Stop);
    Ok(())
}
