// This module provides arena-based compilation session management using the bumpalo crate.
// A CompilationSession lives for one compile pass (an entry template, a component layout or
// a partial compiled on demand) and owns the transient state of that pass: the bump arena
// backing per-block instruction buffers and label tables, interned label names, the name
// of the template being compiled, and compilation statistics. Nothing allocated in the
// arena outlives the pass; finished instructions are copied into the program heap. The
// SessionStats gathered here are merged into the environment so the render binary can
// print a summary of how much bytecode a set of templates produced.

//! Arena-based compilation session management.
//!
//! All transient compiler buffers are tied to the session lifetime, so the
//! opcode builder never has to juggle owned scratch vectors between blocks.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// One encoded instruction: opcode id plus three operands.
pub type Instruction = [u32; 4];

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for compilation scratch data.
    arena: &'arena Bump,

    /// Session statistics.
    stats: RefCell<SessionStats>,

    /// Label names interned for the lifetime of the pass.
    interned_strings: RefCell<HashMap<String, &'arena str>>,

    /// Template currently being compiled.
    current_template: RefCell<Option<String>>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
            interned_strings: RefCell::new(HashMap::new()),
            current_template: RefCell::new(None),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Fresh instruction buffer for one block.
    pub fn instruction_buffer(&self) -> BumpVec<'arena, Instruction> {
        BumpVec::new_in(self.arena)
    }

    /// Intern a string in the arena.
    pub fn intern_str(&self, s: &str) -> &'arena str {
        let mut strings = self.interned_strings.borrow_mut();
        if let Some(&interned) = strings.get(s) {
            return interned;
        }

        let interned = self.arena.alloc_str(s);
        strings.insert(s.to_string(), interned);
        interned
    }

    /// Set the template being compiled.
    pub fn set_current_template(&self, id: &str) {
        *self.current_template.borrow_mut() = Some(id.to_string());
    }

    pub fn current_template(&self) -> Option<String> {
        self.current_template.borrow().clone()
    }

    /// Record that a whole template (entry point, layout or partial) was compiled.
    pub fn record_template_compiled(&self) {
        self.stats.borrow_mut().templates_compiled += 1;
    }

    /// Record a finished block and its size in instructions.
    pub fn record_block_compiled(&self, size: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.blocks_compiled += 1;

        if stats.largest_block_size < size {
            stats.largest_block_size = size;
            stats.largest_block_template = self.current_template().unwrap_or_default();
        }
    }

    /// Record an emitted instruction.
    pub fn record_instruction(&self, opcode: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_emitted += 1;
        *stats
            .instruction_counts
            .entry(opcode.to_string())
            .or_insert(0) += 1;
    }

    /// Record a patched jump target.
    pub fn record_label_patched(&self) {
        self.stats.borrow_mut().labels_patched += 1;
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Entry templates, layouts and partials compiled.
    pub templates_compiled: usize,

    /// Blocks (including nested inline blocks) compiled.
    pub blocks_compiled: usize,

    /// Number of instructions emitted.
    pub instructions_emitted: usize,

    /// Count of each opcode emitted.
    pub instruction_counts: HashMap<String, usize>,

    /// Largest block compiled, in instructions.
    pub largest_block_size: usize,

    /// Template that contained the largest block.
    pub largest_block_template: String,

    /// Jump operands patched from labels.
    pub labels_patched: usize,
}

impl SessionStats {
    /// Fold another session's numbers into this one.
    pub fn merge(&mut self, other: &SessionStats) {
        self.templates_compiled += other.templates_compiled;
        self.blocks_compiled += other.blocks_compiled;
        self.instructions_emitted += other.instructions_emitted;
        self.labels_patched += other.labels_patched;
        for (opcode, count) in &other.instruction_counts {
            *self.instruction_counts.entry(opcode.clone()).or_insert(0) += count;
        }
        if self.largest_block_size < other.largest_block_size {
            self.largest_block_size = other.largest_block_size;
            self.largest_block_template = other.largest_block_template.clone();
        }
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Templates compiled: {}", self.templates_compiled)?;
        writeln!(f, "  Blocks compiled: {}", self.blocks_compiled)?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;
        writeln!(f, "  Labels patched: {}", self.labels_patched)?;

        if !self.largest_block_template.is_empty() {
            writeln!(
                f,
                "  Largest block: {} ({} instructions)",
                self.largest_block_template, self.largest_block_size
            )?;
        }

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

            for (opcode, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", opcode, count)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compilation_session_creation() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let stats = session.stats();
        assert_eq!(stats.templates_compiled, 0);
        assert_eq!(stats.instructions_emitted, 0);
        assert!(session.current_template().is_none());
    }

    #[test]
    fn test_instruction_buffer_lives_in_arena() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let mut buffer = session.instruction_buffer();
        buffer.push([1, 2, 3, 4]);
        buffer.push([5, 0, 0, 0]);
        assert_eq!(buffer.len(), 2);
        assert!(arena.allocated_bytes() > 0);
    }

    #[test]
    fn test_string_interning() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);

        let s1 = session.intern_str("ELSE");
        let s2 = session.intern_str("ELSE");
        let s3 = session.intern_str("END");

        assert_eq!(s1.as_ptr(), s2.as_ptr());
        assert_ne!(s1.as_ptr(), s3.as_ptr());
    }

    #[test]
    fn test_session_statistics() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        session.set_current_template("list.hbs");

        session.record_template_compiled();
        session.record_instruction("Text");
        session.record_instruction("Jump");
        session.record_instruction("Text");
        session.record_label_patched();
        session.record_block_compiled(3);

        let stats = session.stats();
        assert_eq!(stats.templates_compiled, 1);
        assert_eq!(stats.instructions_emitted, 3);
        assert_eq!(stats.instruction_counts["Text"], 2);
        assert_eq!(stats.labels_patched, 1);
        assert_eq!(stats.largest_block_template, "list.hbs");
    }

    #[test]
    fn test_merge_and_display() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        session.set_current_template("card");
        session.record_instruction("OpenElement");
        session.record_block_compiled(7);

        let mut total = SessionStats::default();
        total.merge(&session.stats());
        total.merge(&session.stats());

        assert_eq!(total.instructions_emitted, 2);
        let output = format!("{}", total);
        assert!(output.contains("Instructions emitted: 2"));
        assert!(output.contains("card (7 instructions)"));
        assert!(output.contains("OpenElement: 2"));
    }
}
