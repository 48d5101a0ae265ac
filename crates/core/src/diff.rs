//! Change detection between two descriptor snapshots.

use serde::Serialize;

use crate::types::Descriptor;

/// What changed between the previous and the next descriptor list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorDiff {
	pub did_update: bool,
	/// Paths present now but not before.
	pub connected: Vec<Descriptor>,
	/// Paths present before but not now (previous entries).
	pub disconnected: Vec<Descriptor>,
	/// Paths whose session changed in any way.
	pub changed_sessions: Vec<Descriptor>,
	/// Paths that went from unowned (or another session) to owned.
	pub acquired: Vec<Descriptor>,
	/// Paths that went from owned to unowned.
	pub released: Vec<Descriptor>,
	/// The full next snapshot.
	pub descriptors: Vec<Descriptor>,
}

/// Computes the diff from `previous` to `next`.
pub fn diff(previous: &[Descriptor], next: &[Descriptor]) -> DescriptorDiff {
	let find = |list: &[Descriptor], path: &str| list.iter().position(|d| d.path == path);

	let connected: Vec<Descriptor> = next.iter().filter(|d| find(previous, &d.path).is_none()).cloned().collect();
	let disconnected: Vec<Descriptor> = previous.iter().filter(|d| find(next, &d.path).is_none()).cloned().collect();

	let mut changed_sessions = Vec::new();
	let mut acquired = Vec::new();
	let mut released = Vec::new();
	for current in next {
		let Some(index) = find(previous, &current.path) else {
			continue;
		};
		let before = &previous[index];
		if before.session == current.session {
			continue;
		}
		changed_sessions.push(current.clone());
		match &current.session {
			Some(_) => acquired.push(current.clone()),
			None => released.push(current.clone()),
		}
	}

	let did_update = !connected.is_empty() || !disconnected.is_empty() || !changed_sessions.is_empty();

	DescriptorDiff {
		did_update,
		connected,
		disconnected,
		changed_sessions,
		acquired,
		released,
		descriptors: next.to_vec(),
	}
}
