//! Lazy resolution of forward references in the token stream.
//!
//! Five transitions rewrite a token in place on its first execution:
//!
//! 1. line-number references gain the target line's token address,
//! 2. `PROC`/`FN` call sites gain their subprogram record,
//! 3. `IF` learns whether it is single-line or block and gains both
//!    branch targets,
//! 4. a block `ELSE` (and a fallen-into `WHEN`/`OTHERWISE`) gains the
//!    continuation past its construct,
//! 5. `CASE` gains a prebuilt jump table.
//!
//! The forward scans treat any `THEN` immediately followed by an
//! end-of-line as opening a nested block `IF`; `WHILE` pairing counts
//! nested `WHILE` tokens only, so inner unterminated `REPEAT`/`FOR`
//! loops are invisible here and get silently unwound by `ENDWHILE`.
//!
//! Subprogram resolution scans forward from a cached search position,
//! depositing a marker record for every `DEF` it passes, and stops at the
//! wanted name; markers are upgraded to full records by parsing the
//! definition's parameter list once. Entering a library for the first
//! time processes its `LIBRARY LOCAL` declarations.

use crate::{
    heap::{CaseEntry, CaseTable, Param, SubDef, VarKind},
    runner::{Exec, Flow, Interpreter, Outcome},
    symbols::{self, fresh_kind},
    token::{CaseId, Pc, Token, VarId},
    value::Lvalue,
};
use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use basmi_core::{BasicError, ErrorCode};

/// The symbol-table key of a subprogram: the name with its kind prefix.
fn subprogram_key(bare: &str, is_fn: bool) -> String {
    if is_fn {
        format!("FN{}", bare)
    } else {
        format!("PROC{}", bare)
    }
}

impl Interpreter {
    // === Line references ===================================================

    /// Resolves the line reference at `pc` to a token address, patching
    /// the token for the fast path.
    pub(crate) fn resolve_line_ref(&mut self, pc: Pc) -> Exec<Pc> {
        match self.program.token(pc).clone() {
            Token::LineTarget(target) => Ok(target),
            Token::LineRef(number) => {
                let target = self.line_target(number as i32)?;
                self.program.patch(pc, Token::LineTarget(target));
                Ok(target)
            }
            _ => Err(ErrorCode::Broken.into()),
        }
    }

    // === IF / ELSE =========================================================

    /// First execution of an `IF`: the condition is already evaluated and
    /// the cursor sits after it. Decides single-line against block form,
    /// fills in both branch targets, and takes the branch.
    pub(crate) fn resolve_if(&mut self, if_pc: Pc, condition: bool) -> Exec<Outcome> {
        let (has_then, after_then) = match self.program.token(self.pc) {
            Token::Then => (true, self.pc + 1),
            _ => (false, self.pc),
        };
        let block = has_then && matches!(self.program.token(after_then), Token::Eol);
        let cascade = has_then && !block && self.config.cascade_if;
        if block || cascade {
            let then_pc = after_then;
            let scan_from = if block { after_then + 1 } else { after_then };
            match self.scan_block_close(scan_from, cascade) {
                Ok(else_pc) => {
                    self.program.patch(if_pc, Token::IfBlock { then_pc, else_pc });
                    self.pc = if condition { then_pc } else { else_pc };
                    Ok(Outcome::Next)
                }
                // A true condition does not need the close; execution just
                // carries on into the body (to the end of the program if
                // nothing closes it). A false one does.
                Err(error) => {
                    if condition {
                        self.pc = then_pc;
                        Ok(Outcome::Next)
                    } else {
                        Err(error)
                    }
                }
            }
        } else {
            let then_pc = after_then;
            let mut scan = then_pc;
            let else_pc = loop {
                match self.program.token(scan) {
                    Token::Else => break scan + 1,
                    Token::Eol | Token::Eof => break scan,
                    _ => scan += 1,
                }
            };
            self.program.patch(if_pc, Token::IfSingle { then_pc, else_pc });
            self.pc = if condition { then_pc } else { else_pc };
            Ok(Outcome::Next)
        }
    }

    /// Forward-scans for the token that continues execution when a block
    /// `IF` condition is false: past the depth-0 `ELSE`, or past the
    /// `ENDIF` when there is none. Cascade mode only accepts the `ENDIF`.
    fn scan_block_close(&self, start: Pc, cascade: bool) -> Exec<Pc> {
        let mut pc = start;
        let mut depth = 0usize;
        loop {
            match self.program.token(pc) {
                Token::Eof => return Err(ErrorCode::MissingEndif.into()),
                Token::Then if matches!(self.program.token(pc + 1), Token::Eol) => depth += 1,
                Token::Else | Token::ElseJump(_) if depth == 0 && !cascade => return Ok(pc + 1),
                Token::Endif => {
                    if depth == 0 {
                        return Ok(pc + 1);
                    }
                    depth -= 1;
                }
                _ => {}
            }
            pc += 1;
        }
    }

    /// First execution of a block `ELSE` reached by fall-through: find the
    /// paired `ENDIF` and patch the continuation.
    pub(crate) fn resolve_else(&mut self, else_pc: Pc) -> Exec<Pc> {
        let mut pc = else_pc + 1;
        let mut depth = 0usize;
        let target = loop {
            match self.program.token(pc) {
                Token::Eof => return Err(ErrorCode::MissingEndif.into()),
                Token::Then if matches!(self.program.token(pc + 1), Token::Eol) => depth += 1,
                Token::Endif => {
                    if depth == 0 {
                        break pc + 1;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            pc += 1;
        };
        self.program.patch(else_pc, Token::ElseJump(target));
        Ok(target)
    }

    // === CASE ==============================================================

    /// A `WHEN`/`OTHERWISE` reached by fall-through from the arm above:
    /// the continuation is past the `ENDCASE`.
    pub(crate) fn resolve_when(&mut self, when_pc: Pc) -> Exec<Pc> {
        let target = self.scan_for_endcase(when_pc + 1)?;
        let resolved = match self.program.token(when_pc) {
            Token::When => Token::WhenJump(target),
            Token::Otherwise => Token::OtherwiseJump(target),
            _ => return Err(ErrorCode::Broken.into()),
        };
        self.program.patch(when_pc, resolved);
        Ok(target)
    }

    fn scan_for_endcase(&self, start: Pc) -> Exec<Pc> {
        let mut pc = start;
        let mut depth = 0usize;
        loop {
            match self.program.token(pc) {
                Token::Eof => return Err(ErrorCode::MissingEndcase.into()),
                Token::Case | Token::CaseRes(_) => depth += 1,
                Token::Endcase => {
                    if depth == 0 {
                        return Ok(pc + 1);
                    }
                    depth -= 1;
                }
                _ => {}
            }
            pc += 1;
        }
    }

    /// First execution of a `CASE`: walk to the paired `ENDCASE` once,
    /// collect every depth-0 `WHEN` and the `OTHERWISE`, and store the
    /// jump table so later executions cost one lookup.
    pub(crate) fn resolve_case(&mut self, case_pc: Pc) -> Exec<CaseId> {
        // The selector ends at OF on the CASE line.
        let mut pc = case_pc + 1;
        loop {
            match self.program.token(pc) {
                Token::Of => break,
                Token::Eol | Token::Eof => return Err(ErrorCode::MissingOf.into()),
                _ => pc += 1,
            }
        }
        pc += 1;
        let mut entries: Vec<CaseEntry> = Vec::new();
        let mut otherwise_pc = None;
        let mut depth = 0usize;
        let exit_pc = loop {
            match self.program.token(pc) {
                Token::Eof => return Err(ErrorCode::MissingEndcase.into()),
                Token::Case | Token::CaseRes(_) => {
                    depth += 1;
                    pc += 1;
                }
                Token::Endcase => {
                    if depth == 0 {
                        break pc + 1;
                    }
                    depth -= 1;
                    pc += 1;
                }
                Token::When | Token::WhenJump(_) if depth == 0 => {
                    let expr_pc = pc + 1;
                    let mut cursor = expr_pc;
                    let body_pc = loop {
                        match self.program.token(cursor) {
                            Token::Colon => break cursor + 1,
                            Token::Eol => break cursor,
                            Token::Eof => return Err(ErrorCode::MissingEndcase.into()),
                            _ => cursor += 1,
                        }
                    };
                    entries.push(CaseEntry { expr_pc, body_pc });
                    pc = body_pc;
                }
                Token::Otherwise | Token::OtherwiseJump(_) if depth == 0 => {
                    let mut body = pc + 1;
                    if matches!(self.program.token(body), Token::Colon) {
                        body += 1;
                    }
                    otherwise_pc.get_or_insert(body);
                    pc += 1;
                }
                _ => pc += 1,
            }
        };
        let id = self.heap.alloc_case(CaseTable {
            entries,
            otherwise_pc,
            exit_pc,
        });
        self.program.patch(case_pc, Token::CaseRes(id));
        Ok(id)
    }

    // === WHILE =============================================================

    /// Finds the address after the `ENDWHILE` paired with a `WHILE` whose
    /// body starts at `start`. Only `WHILE` nesting counts.
    pub(crate) fn scan_for_endwhile(&self, start: Pc) -> Exec<Pc> {
        let mut pc = start;
        let mut depth = 0usize;
        loop {
            match self.program.token(pc) {
                Token::Eof => return Err(ErrorCode::MissingEndwhile.into()),
                Token::While | Token::WhileRes(_) => depth += 1,
                Token::Endwhile => {
                    if depth == 0 {
                        return Ok(pc + 1);
                    }
                    depth -= 1;
                }
                _ => {}
            }
            pc += 1;
        }
    }

    // === PROC / FN call sites =============================================

    /// Resolves a call site to its subprogram record, scanning forward
    /// for definitions and upgrading markers as needed; patches the token
    /// so later executions go straight to the record.
    pub(crate) fn resolve_call(&mut self, call_pc: Pc) -> Exec<(VarId, bool)> {
        let (bare, is_fn) = match self.program.token(call_pc).clone() {
            Token::ProcCall(id) => return Ok((id, false)),
            Token::FnCall(id) => return Ok((id, true)),
            Token::ProcUnres(id) => (self.program.name(id).to_string(), false),
            Token::FnUnres(id) => (self.program.name(id).to_string(), true),
            _ => return Err(ErrorCode::Broken.into()),
        };
        let full = subprogram_key(&bare, is_fn);
        let hash = symbols::hash_name(&full);
        let mut found = self.lookup_subprogram(&full, hash, call_pc);
        if found.is_none() {
            found = self.scan_defs(&full)?;
        }
        let id = match found {
            Some(id) => id,
            None => {
                return Err(Flow::Error(BasicError::with_name(
                    ErrorCode::NoSuchProcFn,
                    bare,
                )))
            }
        };
        if let VarKind::Marker { def_pc, is_fn: def_is_fn } = self.heap.var(id).kind {
            let library = self.heap.var(id).library;
            let def = self.parse_formals(def_pc, library)?;
            self.heap.var_mut(id).kind = if def_is_fn {
                VarKind::Fn(def)
            } else {
                VarKind::Proc(def)
            };
        }
        let kind_matches = matches!(
            (&self.heap.var(id).kind, is_fn),
            (VarKind::Proc(_), false) | (VarKind::Fn(_), true)
        );
        if !kind_matches {
            return Err(Flow::Error(BasicError::with_name(
                ErrorCode::NoSuchProcFn,
                bare,
            )));
        }
        let unresolved = self.program.token(call_pc).clone();
        let resolved = if is_fn {
            Token::FnCall(id)
        } else {
            Token::ProcCall(id)
        };
        self.program.patch(call_pc, resolved);
        self.call_patches.push((call_pc, unresolved));
        Ok((id, is_fn))
    }

    /// Subprograms resolve across every table: the calling library first,
    /// then the main table, then the other libraries in load order.
    fn lookup_subprogram(&self, full: &str, hash: u32, call_pc: Pc) -> Option<VarId> {
        let own = self.program.library_of(call_pc);
        if let Some(lib) = own {
            if let Some(found) = self.lib_tables[lib].find(&self.heap, full, hash) {
                return Some(found);
            }
        }
        if let Some(found) = self.main_table.find(&self.heap, full, hash) {
            return Some(found);
        }
        self.lib_tables
            .iter()
            .enumerate()
            .filter(|(lib, _)| Some(*lib) != own)
            .find_map(|(_, table)| table.find(&self.heap, full, hash))
    }

    /// Scans forward from the cached search position, inserting a marker
    /// for each `DEF` passed, stopping at `wanted`.
    fn scan_defs(&mut self, wanted: &str) -> Exec<Option<VarId>> {
        let len = self.program.code.len() as Pc;
        let mut pc = self.scan_pc.min(len);
        let mut result = None;
        while pc < len {
            if let Some(lib) = self.program.library_of(pc) {
                if !self.lib_scanned[lib] {
                    self.scan_library_privates(lib)?;
                }
            }
            if !matches!(self.program.token(pc), Token::Def) {
                pc += 1;
                continue;
            }
            let name_pc = pc + 1;
            let (name_id, is_fn) = match self.program.token(name_pc) {
                Token::ProcUnres(id) => (*id, false),
                Token::FnUnres(id) => (*id, true),
                _ => {
                    pc += 1;
                    continue;
                }
            };
            let full = subprogram_key(self.program.name(name_id), is_fn);
            let library = self.program.library_of(pc);
            let hash = symbols::hash_name(&full);
            let table = match library {
                Some(lib) => &mut self.lib_tables[lib],
                None => &mut self.main_table,
            };
            let id = match table.find(&self.heap, &full, hash) {
                Some(id) => id,
                None => table.insert(
                    &mut self.heap,
                    &full,
                    hash,
                    library,
                    VarKind::Marker {
                        def_pc: name_pc + 1,
                        is_fn,
                    },
                ),
            };
            pc = name_pc + 1;
            if full == wanted {
                self.scan_pc = pc;
                result = Some(id);
                break;
            }
        }
        if result.is_none() {
            self.scan_pc = len;
        }
        Ok(result)
    }

    /// Parses a definition's formal parameter list, creating the formal
    /// variables, and builds the full subprogram record.
    fn parse_formals(&mut self, header_pc: Pc, library: Option<usize>) -> Exec<SubDef> {
        let mut pc = header_pc;
        let mut params: Vec<Param> = Vec::new();
        if matches!(self.program.token(pc), Token::LParen) {
            pc += 1;
            loop {
                let by_return = if matches!(self.program.token(pc), Token::Return) {
                    pc += 1;
                    true
                } else {
                    false
                };
                let target = match self.program.token(pc).clone() {
                    Token::Static(slot) => {
                        pc += 1;
                        Lvalue::Static(slot)
                    }
                    Token::Var(id) => {
                        let name = self.program.name(id).to_string();
                        pc += 1;
                        if name.ends_with('(') {
                            // A whole-array formal spells as `name()`.
                            if !matches!(self.program.token(pc), Token::RParen) {
                                return Err(self.syntax_error().into());
                            }
                            pc += 1;
                            Lvalue::WholeArray(self.formal_variable(&name, library))
                        } else {
                            Lvalue::Scalar(self.formal_variable(&name, library))
                        }
                    }
                    _ => return Err(self.syntax_error().into()),
                };
                params.push(Param { target, by_return });
                match self.program.token(pc) {
                    Token::Comma => pc += 1,
                    Token::RParen => {
                        pc += 1;
                        break;
                    }
                    _ => return Err(self.syntax_error().into()),
                }
            }
        }
        let simple_int = params.len() == 1
            && !params[0].by_return
            && match &params[0].target {
                Lvalue::Static(_) => true,
                Lvalue::Scalar(id) => matches!(self.heap.var(*id).kind, VarKind::I32(_)),
                _ => false,
            };
        Ok(SubDef {
            entry_pc: pc,
            params: params.into(),
            simple_int,
        })
    }

    /// Finds or creates a formal's variable: the defining library's table
    /// shadows the main one, creation lands in the main table.
    fn formal_variable(&mut self, name: &str, library: Option<usize>) -> VarId {
        let hash = symbols::hash_name(name);
        if let Some(lib) = library {
            if let Some(found) = self.lib_tables[lib].find(&self.heap, name, hash) {
                return found;
            }
        }
        if let Some(found) = self.main_table.find(&self.heap, name, hash) {
            return found;
        }
        let kind = fresh_kind(name, &self.heap);
        self.main_table.insert(&mut self.heap, name, hash, None, kind)
    }

    /// First scan into a library: create its `LIBRARY LOCAL` private
    /// variables, dimensioning literal-bounded private arrays on the way.
    fn scan_library_privates(&mut self, lib: usize) -> Exec<()> {
        self.lib_scanned[lib] = true;
        let (start, end) = self.program.library_ranges[lib];
        let mut pc = start;
        while pc < end {
            let is_declaration = matches!(self.program.token(pc), Token::Library)
                && matches!(self.program.token(pc + 1), Token::Local);
            if !is_declaration {
                pc += 1;
                continue;
            }
            let mut cursor = pc + 2;
            loop {
                match self.program.token(cursor).clone() {
                    Token::Comma | Token::Static(_) => cursor += 1,
                    Token::Var(id) => {
                        let name = self.program.name(id).to_string();
                        cursor += 1;
                        let hash = symbols::hash_name(&name);
                        let var = match self.lib_tables[lib].find(&self.heap, &name, hash) {
                            Some(found) => found,
                            None => {
                                let kind = fresh_kind(&name, &self.heap);
                                self.lib_tables[lib].insert(
                                    &mut self.heap,
                                    &name,
                                    hash,
                                    Some(lib),
                                    kind,
                                )
                            }
                        };
                        if name.ends_with('(') {
                            cursor = self.dim_private_array(var, cursor)?;
                        }
                    }
                    _ => break,
                }
            }
            pc = cursor;
        }
        Ok(())
    }

    /// Dimensions a library-private array whose bounds are integer
    /// literals, returning the cursor past the closing parenthesis.
    fn dim_private_array(&mut self, var: VarId, mut cursor: Pc) -> Exec<Pc> {
        let mut dims: Vec<u32> = Vec::new();
        loop {
            match self.program.token(cursor).clone() {
                Token::IntConst(bound) if bound >= 0 => {
                    dims.push(bound as u32 + 1);
                    cursor += 1;
                }
                Token::Comma => cursor += 1,
                Token::RParen => {
                    cursor += 1;
                    break;
                }
                _ => return Err(ErrorCode::BadDim.into()),
            }
        }
        if dims.is_empty() {
            return Ok(cursor);
        }
        let elem = self.array_elem_type(var)?;
        let elem_count: u32 = dims.iter().product();
        let data = crate::heap::zeroed_data(elem, elem_count, self.heap.empty_str());
        if let VarKind::Array { desc, .. } = &mut self.heap.var_mut(var).kind {
            *desc = Some(crate::heap::ArrayDescriptor {
                dims: dims.into(),
                elem_count,
                data,
            });
        }
        Ok(cursor)
    }
}
