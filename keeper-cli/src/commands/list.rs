//! List available check types.

use keeper_checks::CheckKind;

/// Run the list command.
pub fn run() {
    let width = CheckKind::ALL
        .iter()
        .map(|kind| kind.name().len())
        .max()
        .unwrap_or(0);
    for kind in CheckKind::ALL {
        println!("{:width$}  {}", kind.name(), kind.description());
    }
}
