//! Recursive descent parser.
//!
//! Builds the AST from the buffered token stream. Expressions use
//! precedence climbing; structural constraints (`return` placement,
//! `break`/`continue` placement, l-value forms, duplicate functions,
//! register naming) are enforced while parsing so later stages never
//! see an ill-formed tree.
use std::collections::HashSet;

use smol_str::SmolStr;

use crate::{
    ast::{
        ArrayDecl, BinOp, Block, Expr, FuncCall, FuncDef, Global, Item, LValue, Program, PtrDecl,
        Stmt, Ty, UnOp, VarDecl,
    },
    error::{ParseError, Pos},
    token_stream::TokenStream,
    tokens::{parse_number, KeywordKind, Token, TokenKind},
};

pub struct Parser<'a> {
    stream: TokenStream<'a>,
    /// Names of functions defined so far, for redefinition checks.
    functions: HashSet<SmolStr>,
    loop_depth: usize,
    in_function: bool,
}

impl<'a> Parser<'a> {
    pub fn new(stream: TokenStream<'a>) -> Self {
        Self {
            stream,
            functions: HashSet::new(),
            loop_depth: 0,
            in_function: false,
        }
    }

    /// Parse the whole translation unit.
    pub fn parse_program(mut self) -> Result<Program, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        let mut items = Vec::new();
        while !self.stream.at_end() {
            match self.stream.peek().kind {
                T::Keyword(K::Function | K::Interrupt) => {
                    items.push(Item::Func(self.parse_function()?));
                }
                T::Keyword(K::Uint32 | K::Int32 | K::Register | K::Volatile) => {
                    items.push(Item::Global(self.parse_declaration()?));
                }
                _ => {
                    let token = self.stream.peek();
                    return Err(ParseError::Unexpected {
                        expected: "function or global declaration".to_string(),
                        found: token.kind.to_string(),
                        pos: token.pos.clone(),
                    });
                }
            }
        }

        if !self.functions.contains("main") {
            return Err(ParseError::MissingMain);
        }
        Ok(Program { items })
    }

    fn parse_function(&mut self) -> Result<FuncDef, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        let interrupt = self.stream.match_token(T::Keyword(K::Interrupt));
        let keyword = self.stream.consume(T::Keyword(K::Function))?;
        let name_token = self.stream.consume(T::Ident)?;
        let name = self.ident_name(&name_token);

        if !self.functions.insert(name.clone()) {
            return Err(ParseError::DuplicateFunction {
                name,
                pos: name_token.pos,
            });
        }

        self.stream.consume(T::LeftParen)?;
        let mut params = Vec::new();
        if self.stream.peek().kind != T::RightParen {
            loop {
                params.push(self.parse_param()?);
                if !self.stream.match_token(T::Comma) {
                    break;
                }
            }
        }
        self.stream.consume(T::RightParen)?;

        if interrupt && !params.is_empty() {
            return Err(ParseError::Generic {
                message: format!("interrupt function '{}' cannot have parameters", name),
                pos: name_token.pos,
            });
        }

        self.in_function = true;
        let body = self.parse_block();
        self.in_function = false;

        Ok(FuncDef {
            name,
            params,
            body: body?,
            interrupt,
            pos: keyword.pos,
        })
    }

    /// One parameter. A `uint32`/`int32` type prefix (optionally with a
    /// `*`) is accepted and ignored; parameters are positional words.
    fn parse_param(&mut self) -> Result<SmolStr, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        if self.stream.match_token(T::Keyword(K::Uint32))
            || self.stream.match_token(T::Keyword(K::Int32))
        {
            self.stream.match_token(T::Star);
        }
        let token = self.stream.consume(T::Ident)?;
        Ok(self.ident_name(&token))
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        use TokenKind as T;

        self.stream.consume(T::LeftBrace)?;
        let mut stmts = Vec::new();
        while self.stream.peek().kind != T::RightBrace {
            if self.stream.at_end() {
                let token = self.stream.peek();
                return Err(ParseError::Unexpected {
                    expected: "}".to_string(),
                    found: token.kind.to_string(),
                    pos: token.pos.clone(),
                });
            }
            stmts.push(self.parse_statement()?);
        }
        self.stream.consume(T::RightBrace)?;
        Ok(Block { stmts })
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        let (kind, pos) = {
            let token = self.stream.peek();
            (token.kind, token.pos.clone())
        };

        match kind {
            T::Keyword(K::Uint32 | K::Int32 | K::Register | K::Volatile) => {
                Ok(decl_stmt(self.parse_declaration()?))
            }
            T::PlusPlus => {
                self.stream.next_token();
                let name = self.expect_ident()?;
                self.stream.consume(T::Semicolon)?;
                Ok(Stmt::Incr { name, pos })
            }
            T::MinusMinus => {
                self.stream.next_token();
                let name = self.expect_ident()?;
                self.stream.consume(T::Semicolon)?;
                Ok(Stmt::Decr { name, pos })
            }
            T::Keyword(K::Return) => self.parse_return(),
            T::Keyword(K::If) => self.parse_if(),
            T::Keyword(K::While) => self.parse_while(),
            T::Keyword(K::Do) => self.parse_do_while(),
            T::Keyword(K::For) => self.parse_for(),
            T::Keyword(K::Break) => {
                self.stream.next_token();
                if self.loop_depth == 0 {
                    return Err(ParseError::BreakOutsideLoop { pos });
                }
                self.stream.consume(T::Semicolon)?;
                Ok(Stmt::Break { pos })
            }
            T::Keyword(K::Continue) => {
                self.stream.next_token();
                if self.loop_depth == 0 {
                    return Err(ParseError::ContinueOutsideLoop { pos });
                }
                self.stream.consume(T::Semicolon)?;
                Ok(Stmt::Continue { pos })
            }
            T::Keyword(K::Asm) => self.parse_asm(),
            T::LeftBrace => Ok(Stmt::Block(self.parse_block()?)),
            T::Ident => self.parse_ident_statement(),
            T::Star => {
                let target = self.parse_deref_lvalue()?;
                let stmt = self.parse_assignment_tail(target)?;
                self.stream.consume(T::Semicolon)?;
                Ok(stmt)
            }
            _ => Err(ParseError::Unexpected {
                expected: "statement".to_string(),
                found: kind.to_string(),
                pos,
            }),
        }
    }

    /// Statements that start with an identifier: call, postfix
    /// increment/decrement, or assignment.
    fn parse_ident_statement(&mut self) -> Result<Stmt, ParseError> {
        use TokenKind as T;

        match self.stream.peek2().kind {
            T::LeftParen => {
                let call = self.parse_call()?;
                self.stream.consume(T::Semicolon)?;
                Ok(Stmt::Call(call))
            }
            T::PlusPlus => {
                let name_token = self.stream.consume(T::Ident)?;
                let name = self.ident_name(&name_token);
                self.stream.next_token();
                self.stream.consume(T::Semicolon)?;
                Ok(Stmt::Incr {
                    name,
                    pos: name_token.pos,
                })
            }
            T::MinusMinus => {
                let name_token = self.stream.consume(T::Ident)?;
                let name = self.ident_name(&name_token);
                self.stream.next_token();
                self.stream.consume(T::Semicolon)?;
                Ok(Stmt::Decr {
                    name,
                    pos: name_token.pos,
                })
            }
            _ => {
                let target = self.parse_name_lvalue()?;
                let stmt = self.parse_assignment_tail(target)?;
                self.stream.consume(T::Semicolon)?;
                Ok(stmt)
            }
        }
    }

    /// `= expr` or `op= expr` after an l-value. Compound assignment is
    /// the operator token immediately followed by `=`; the lexer has no
    /// fused compound tokens.
    fn parse_assignment_tail(&mut self, target: LValue) -> Result<Stmt, ParseError> {
        use TokenKind as T;

        let pos = target.pos().clone();
        if self.stream.match_token(T::Eq) {
            let value = self.parse_expression()?;
            return Ok(Stmt::Assign { target, value, pos });
        }

        #[rustfmt::skip]
        let op = match self.stream.peek().kind {
            T::Plus    => BinOp::Add,
            T::Minus   => BinOp::Sub,
            T::Star    => BinOp::Mul,
            T::Slash   => BinOp::Div,
            T::Percent => BinOp::Rem,
            T::Amp     => BinOp::BitAnd,
            T::Pipe    => BinOp::BitOr,
            T::Caret   => BinOp::BitXor,
            T::Shl     => BinOp::Shl,
            T::Shr     => BinOp::Shr,
            other => {
                return Err(ParseError::Unexpected {
                    expected: "=".to_string(),
                    found: other.to_string(),
                    pos: self.stream.peek().pos.clone(),
                })
            }
        };
        if self.stream.peek2().kind != T::Eq {
            let token = self.stream.peek();
            return Err(ParseError::Unexpected {
                expected: "=".to_string(),
                found: token.kind.to_string(),
                pos: token.pos.clone(),
            });
        }
        self.stream.next_token();
        self.stream.next_token();
        let value = self.parse_expression()?;
        Ok(Stmt::CompoundAssign {
            target,
            op,
            value,
            pos,
        })
    }

    /// Variable, array or pointer declaration, shared between file
    /// scope and statement scope.
    fn parse_declaration(&mut self) -> Result<Global, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        let mut register = false;
        let mut volatile = false;
        loop {
            if self.stream.match_token(T::Keyword(K::Register)) {
                register = true;
            } else if self.stream.match_token(T::Keyword(K::Volatile)) {
                volatile = true;
            } else {
                break;
            }
        }

        let ty = if self.stream.match_token(T::Keyword(K::Uint32)) {
            Ty::U32
        } else if self.stream.match_token(T::Keyword(K::Int32)) {
            Ty::I32
        } else {
            let token = self.stream.peek();
            return Err(ParseError::Unexpected {
                expected: "uint32 or int32".to_string(),
                found: token.kind.to_string(),
                pos: token.pos.clone(),
            });
        };

        let pointer = self.stream.match_token(T::Star);
        let name_token = self.stream.consume(T::Ident)?;
        let name = self.ident_name(&name_token);
        let pos = name_token.pos;

        if self.stream.match_token(T::LeftBracket) {
            if register {
                return Err(ParseError::InvalidQualifier {
                    detail: "'register' cannot apply to an array".to_string(),
                    pos,
                });
            }
            if pointer {
                return Err(ParseError::InvalidQualifier {
                    detail: "arrays of pointers are not supported".to_string(),
                    pos,
                });
            }
            let len_token = self.stream.consume(T::Number)?;
            let len = parse_number(self.stream.fragment(&len_token.span)).ok_or_else(|| {
                ParseError::Generic {
                    message: "malformed array length".to_string(),
                    pos: len_token.pos.clone(),
                }
            })?;
            if len == 0 {
                return Err(ParseError::Generic {
                    message: format!("array '{}' must have a positive length", name),
                    pos: len_token.pos.clone(),
                });
            }
            self.stream.consume(T::RightBracket)?;

            let init = if self.stream.match_token(T::Eq) {
                self.stream.consume(T::LeftBrace)?;
                let mut values = Vec::new();
                if self.stream.peek().kind != T::RightBrace {
                    loop {
                        values.push(self.parse_expression()?);
                        if !self.stream.match_token(T::Comma) {
                            break;
                        }
                    }
                }
                self.stream.consume(T::RightBrace)?;
                if values.len() as u32 > len {
                    return Err(ParseError::Generic {
                        message: format!(
                            "too many initializers for array '{}': got {}, expected at most {}",
                            name,
                            values.len(),
                            len
                        ),
                        pos,
                    });
                }
                Some(values)
            } else {
                None
            };
            self.stream.consume(T::Semicolon)?;
            return Ok(Global::Array(ArrayDecl {
                name,
                ty,
                len,
                init,
                volatile,
                pos,
            }));
        }

        if pointer {
            if register {
                return Err(ParseError::InvalidQualifier {
                    detail: "'register' cannot apply to a pointer".to_string(),
                    pos,
                });
            }
            let init = if self.stream.match_token(T::Eq) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            self.stream.consume(T::Semicolon)?;
            return Ok(Global::Ptr(PtrDecl {
                name,
                init,
                volatile,
                pos,
            }));
        }

        let register_slot = if register {
            Some(self.register_slot(&name, &pos)?)
        } else {
            None
        };
        let init = if self.stream.match_token(T::Eq) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.stream.consume(T::Semicolon)?;
        Ok(Global::Var(VarDecl {
            name,
            ty,
            init,
            volatile,
            register: register_slot,
            pos,
        }))
    }

    /// A `register` variable must be named `r0`-`r30`. `r31` is the
    /// program counter and is read-only.
    fn register_slot(&self, name: &SmolStr, pos: &Pos) -> Result<u8, ParseError> {
        let slot = name
            .strip_prefix('r')
            .and_then(|digits| digits.parse::<u8>().ok());
        match slot {
            Some(slot) if slot <= 30 => Ok(slot),
            _ => Err(ParseError::InvalidRegister {
                name: name.clone(),
                pos: pos.clone(),
            }),
        }
    }

    fn parse_return(&mut self) -> Result<Stmt, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        let keyword = self.stream.consume(T::Keyword(K::Return))?;
        if !self.in_function {
            return Err(ParseError::ReturnOutsideFunction { pos: keyword.pos });
        }
        let value = if self.stream.peek().kind != T::Semicolon {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.stream.consume(T::Semicolon)?;
        Ok(Stmt::Return {
            value,
            pos: keyword.pos,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        let keyword = self.stream.consume(T::Keyword(K::If))?;
        self.stream.consume(T::LeftParen)?;
        let cond = self.parse_expression()?;
        self.stream.consume(T::RightParen)?;
        let then_branch = Box::new(self.parse_statement()?);
        let else_branch = if self.stream.match_token(T::Keyword(K::Else)) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
            pos: keyword.pos,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        let keyword = self.stream.consume(T::Keyword(K::While))?;
        self.stream.consume(T::LeftParen)?;
        let cond = self.parse_expression()?;
        self.stream.consume(T::RightParen)?;

        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;

        Ok(Stmt::While {
            cond,
            body: Box::new(body?),
            pos: keyword.pos,
        })
    }

    fn parse_do_while(&mut self) -> Result<Stmt, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        let keyword = self.stream.consume(T::Keyword(K::Do))?;

        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        let body = body?;

        self.stream.consume(T::Keyword(K::While))?;
        self.stream.consume(T::LeftParen)?;
        let cond = self.parse_expression()?;
        self.stream.consume(T::RightParen)?;
        self.stream.consume(T::Semicolon)?;

        Ok(Stmt::DoWhile {
            body: Box::new(body),
            cond,
            pos: keyword.pos,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        let keyword = self.stream.consume(T::Keyword(K::For))?;
        self.stream.consume(T::LeftParen)?;

        let init = if self.stream.peek().kind == T::Semicolon {
            None
        } else {
            Some(Box::new(self.parse_for_init()?))
        };
        self.stream.consume(T::Semicolon)?;

        let cond = if self.stream.peek().kind == T::Semicolon {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.stream.consume(T::Semicolon)?;

        let step = if self.stream.peek().kind == T::RightParen {
            None
        } else {
            Some(Box::new(self.parse_for_step()?))
        };
        self.stream.consume(T::RightParen)?;

        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;

        Ok(Stmt::For {
            init,
            cond,
            step,
            body: Box::new(body?),
            pos: keyword.pos,
        })
    }

    /// The init slot of a `for` header: an unqualified declaration or
    /// an assignment, with no trailing semicolon.
    fn parse_for_init(&mut self) -> Result<Stmt, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        if let T::Keyword(K::Uint32 | K::Int32) = self.stream.peek().kind {
            let ty = if self.stream.match_token(T::Keyword(K::Uint32)) {
                Ty::U32
            } else {
                self.stream.next_token();
                Ty::I32
            };
            let name_token = self.stream.consume(T::Ident)?;
            let name = self.ident_name(&name_token);
            let init = if self.stream.match_token(T::Eq) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            return Ok(Stmt::Var(VarDecl {
                name,
                ty,
                init,
                volatile: false,
                register: None,
                pos: name_token.pos,
            }));
        }

        let target = self.parse_name_lvalue()?;
        self.parse_assignment_tail(target)
    }

    /// The step slot of a `for` header: increment, decrement or an
    /// assignment, with no trailing parenthesis consumed.
    fn parse_for_step(&mut self) -> Result<Stmt, ParseError> {
        use TokenKind as T;

        let (kind, pos) = {
            let token = self.stream.peek();
            (token.kind, token.pos.clone())
        };
        match kind {
            T::PlusPlus => {
                self.stream.next_token();
                let name = self.expect_ident()?;
                Ok(Stmt::Incr { name, pos })
            }
            T::MinusMinus => {
                self.stream.next_token();
                let name = self.expect_ident()?;
                Ok(Stmt::Decr { name, pos })
            }
            T::Ident => match self.stream.peek2().kind {
                T::PlusPlus => {
                    let name = self.expect_ident()?;
                    self.stream.next_token();
                    Ok(Stmt::Incr { name, pos })
                }
                T::MinusMinus => {
                    let name = self.expect_ident()?;
                    self.stream.next_token();
                    Ok(Stmt::Decr { name, pos })
                }
                _ => {
                    let target = self.parse_name_lvalue()?;
                    self.parse_assignment_tail(target)
                }
            },
            T::Star => {
                let target = self.parse_deref_lvalue()?;
                self.parse_assignment_tail(target)
            }
            _ => Err(ParseError::Unexpected {
                expected: "for-loop step".to_string(),
                found: kind.to_string(),
                pos,
            }),
        }
    }

    fn parse_asm(&mut self) -> Result<Stmt, ParseError> {
        use KeywordKind as K;
        use TokenKind as T;

        let keyword = self.stream.consume(T::Keyword(K::Asm))?;
        self.stream.consume(T::LeftBrace)?;
        let payload = self.stream.consume(T::AsmText)?;
        let body = self.stream.fragment(&payload.span).to_string();
        self.stream.consume(T::RightBrace)?;
        self.stream.consume(T::Semicolon)?;
        Ok(Stmt::Asm {
            body,
            pos: keyword.pos,
        })
    }

    fn parse_call(&mut self) -> Result<FuncCall, ParseError> {
        use TokenKind as T;

        let name_token = self.stream.consume(T::Ident)?;
        let name = self.ident_name(&name_token);
        self.stream.consume(T::LeftParen)?;
        let mut args = Vec::new();
        if self.stream.peek().kind != T::RightParen {
            loop {
                args.push(self.parse_expression()?);
                if !self.stream.match_token(T::Comma) {
                    break;
                }
            }
        }
        self.stream.consume(T::RightParen)?;
        Ok(FuncCall {
            name,
            args,
            pos: name_token.pos,
        })
    }

    /// L-value starting with an identifier: `name` or `name[index]`.
    fn parse_name_lvalue(&mut self) -> Result<LValue, ParseError> {
        use TokenKind as T;

        let name_token = self.stream.consume(T::Ident)?;
        let name = self.ident_name(&name_token);
        let pos = name_token.pos;
        if self.stream.match_token(T::LeftBracket) {
            let index = self.parse_expression()?;
            self.stream.consume(T::RightBracket)?;
            Ok(LValue::Index { name, index, pos })
        } else {
            Ok(LValue::Name { name, pos })
        }
    }

    /// L-value of the form `*addr`.
    fn parse_deref_lvalue(&mut self) -> Result<LValue, ParseError> {
        let star = self.stream.consume(TokenKind::Star)?;
        let addr = self.parse_unary()?;
        Ok(LValue::Deref {
            addr,
            pos: star.pos,
        })
    }

    // --- Expressions -----------------------------------------------------
    //
    // Precedence levels, lowest to highest: logical-or, logical-and,
    // bitwise-or, bitwise-xor, bitwise-and, equality, relational, shift,
    // additive, multiplicative, unary, postfix, primary. All binary
    // operators are left-associative.

    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_logical_or()
    }

    fn parse_binary(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ParseError>,
        table: &[(TokenKind, BinOp)],
    ) -> Result<Expr, ParseError> {
        let mut lhs = next(self)?;
        'climb: loop {
            let kind = self.stream.peek().kind;
            for (token_kind, op) in table {
                if kind == *token_kind {
                    let op_token = self.stream.next_token();
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                        pos: op_token.pos,
                    };
                    continue 'climb;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_logical_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            Self::parse_logical_and,
            &[(TokenKind::OrOr, BinOp::LogicalOr)],
        )
    }

    fn parse_logical_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            Self::parse_bitwise_or,
            &[(TokenKind::AndAnd, BinOp::LogicalAnd)],
        )
    }

    fn parse_bitwise_or(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(Self::parse_bitwise_xor, &[(TokenKind::Pipe, BinOp::BitOr)])
    }

    fn parse_bitwise_xor(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            Self::parse_bitwise_and,
            &[(TokenKind::Caret, BinOp::BitXor)],
        )
    }

    fn parse_bitwise_and(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(Self::parse_equality, &[(TokenKind::Amp, BinOp::BitAnd)])
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            Self::parse_relational,
            &[
                (TokenKind::EqEq, BinOp::Eq),
                (TokenKind::BangEq, BinOp::Ne),
            ],
        )
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            Self::parse_shift,
            &[
                (TokenKind::Lt, BinOp::Lt),
                (TokenKind::LtEq, BinOp::Le),
                (TokenKind::Gt, BinOp::Gt),
                (TokenKind::GtEq, BinOp::Ge),
            ],
        )
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            Self::parse_additive,
            &[
                (TokenKind::Shl, BinOp::Shl),
                (TokenKind::Shr, BinOp::Shr),
            ],
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            Self::parse_multiplicative,
            &[
                (TokenKind::Plus, BinOp::Add),
                (TokenKind::Minus, BinOp::Sub),
            ],
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(
            Self::parse_unary,
            &[
                (TokenKind::Star, BinOp::Mul),
                (TokenKind::Slash, BinOp::Div),
                (TokenKind::Percent, BinOp::Rem),
            ],
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        use TokenKind as T;

        let (kind, pos) = {
            let token = self.stream.peek();
            (token.kind, token.pos.clone())
        };
        match kind {
            T::Amp => {
                self.stream.next_token();
                let operand = self.parse_unary()?;
                let target = expr_to_lvalue(operand)?;
                Ok(Expr::AddrOf {
                    target: Box::new(target),
                    pos,
                })
            }
            T::Star => {
                self.stream.next_token();
                let addr = self.parse_unary()?;
                Ok(Expr::Deref {
                    addr: Box::new(addr),
                    pos,
                })
            }
            T::Bang => {
                self.stream.next_token();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnOp::Not,
                    operand: Box::new(operand),
                    pos,
                })
            }
            T::Tilde => {
                self.stream.next_token();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnOp::BitNot,
                    operand: Box::new(operand),
                    pos,
                })
            }
            T::Minus => {
                self.stream.next_token();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnOp::Neg,
                    operand: Box::new(operand),
                    pos,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        use TokenKind as T;

        let mut expr = self.parse_primary()?;
        while self.stream.peek().kind == T::LeftBracket {
            let bracket = self.stream.next_token();
            let index = self.parse_expression()?;
            self.stream.consume(T::RightBracket)?;
            expr = match expr {
                Expr::Ident { name, .. } => Expr::Index {
                    name,
                    index: Box::new(index),
                    pos: bracket.pos,
                },
                other => {
                    return Err(ParseError::Generic {
                        message: "array access requires an array name".to_string(),
                        pos: other.pos().clone(),
                    })
                }
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        use TokenKind as T;

        let (kind, pos) = {
            let token = self.stream.peek();
            (token.kind, token.pos.clone())
        };
        match kind {
            T::Number => {
                let token = self.stream.next_token();
                let fragment = self.stream.fragment(&token.span);
                let value = parse_number(fragment).ok_or_else(|| ParseError::Generic {
                    message: format!("malformed integer literal '{}'", fragment),
                    pos: token.pos.clone(),
                })?;
                Ok(Expr::Literal {
                    value,
                    pos: token.pos,
                })
            }
            T::Ident => {
                if self.stream.peek2().kind == T::LeftParen {
                    Ok(Expr::Call(self.parse_call()?))
                } else {
                    let token = self.stream.next_token();
                    Ok(Expr::Ident {
                        name: self.ident_name(&token),
                        pos: token.pos,
                    })
                }
            }
            T::LeftParen => {
                self.stream.next_token();
                let expr = self.parse_expression()?;
                self.stream.consume(T::RightParen)?;
                Ok(expr)
            }
            _ => Err(ParseError::Unexpected {
                expected: "expression".to_string(),
                found: kind.to_string(),
                pos,
            }),
        }
    }

    fn expect_ident(&mut self) -> Result<SmolStr, ParseError> {
        let token = self.stream.consume(TokenKind::Ident)?;
        Ok(self.ident_name(&token))
    }

    #[inline]
    fn ident_name(&self, token: &Token) -> SmolStr {
        SmolStr::new(self.stream.fragment(&token.span))
    }
}

/// A declaration node in statement position.
fn decl_stmt(decl: Global) -> Stmt {
    match decl {
        Global::Var(decl) => Stmt::Var(decl),
        Global::Array(decl) => Stmt::Array(decl),
        Global::Ptr(decl) => Stmt::Ptr(decl),
    }
}

/// Reinterpret an expression as an l-value for `&`.
fn expr_to_lvalue(expr: Expr) -> Result<LValue, ParseError> {
    match expr {
        Expr::Ident { name, pos } => Ok(LValue::Name { name, pos }),
        Expr::Index { name, index, pos } => Ok(LValue::Index {
            name,
            index: *index,
            pos,
        }),
        Expr::Deref { addr, pos } => Ok(LValue::Deref { addr: *addr, pos }),
        other => Err(ParseError::MalformedLValue {
            pos: other.pos().clone(),
        }),
    }
}
