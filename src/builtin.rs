#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Builtin {
	/// Leaves the interpreter at once, abandoning background jobs.
	Exit,
}

pub fn match_builtin(name: &str) -> Option<Builtin> {
	match name {
		"exit" => Some(Builtin::Exit),
		_ => None,
	}
}
