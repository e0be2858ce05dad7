#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
mod bitwise;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unreadable_literal)]
pub mod bus;

pub mod gba;

#[allow(clippy::module_name_repetitions)]
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unreadable_literal)]
pub mod hardware;
