#![forbid(unsafe_code)]

use funnel_contracts::postback::FunnelStage;

use crate::funnel::{FunnelContext, SequencerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizBlockMeta {
    pub id: u8,
    pub page_path: &'static str,
    pub stage: FunnelStage,
    pub next_path: &'static str,
}

pub const QUIZ_BLOCKS: [QuizBlockMeta; 5] = [
    QuizBlockMeta {
        id: 1,
        page_path: "/block-1",
        stage: FunnelStage::Block1Completed,
        next_path: "/block-2",
    },
    QuizBlockMeta {
        id: 2,
        page_path: "/block-2",
        stage: FunnelStage::Block2Completed,
        next_path: "/block-3",
    },
    QuizBlockMeta {
        id: 3,
        page_path: "/block-3",
        stage: FunnelStage::Block3Completed,
        next_path: "/block-4",
    },
    QuizBlockMeta {
        id: 4,
        page_path: "/block-4",
        stage: FunnelStage::Block4Completed,
        next_path: "/block-5",
    },
    QuizBlockMeta {
        id: 5,
        page_path: "/block-5",
        stage: FunnelStage::Block5Completed,
        next_path: "/block-6",
    },
];

pub fn quiz_block_meta(id: u8) -> Option<QuizBlockMeta> {
    QUIZ_BLOCKS.iter().copied().find(|m| m.id == id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizStep {
    NextQuestion(usize),
    Completed,
    /// Selection after the block already completed.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizProgress {
    /// Zero-based position of the block in the quiz.
    pub block_index: usize,
    /// One-based.
    pub question_current: usize,
    pub question_total: usize,
    pub completed: bool,
}

/// Question flow of one quiz block. The block's postback fires only from
/// `continue_to_next`, after every question has an answer.
#[derive(Debug, Clone)]
pub struct QuizBlockSequencer {
    meta: QuizBlockMeta,
    question_count: usize,
    question_index: usize,
    answers: Vec<usize>,
    completed: bool,
}

impl QuizBlockSequencer {
    pub fn new(block_id: u8, question_count: usize) -> Result<Self, SequencerError> {
        let meta = quiz_block_meta(block_id).ok_or(SequencerError::UnknownBlock(block_id))?;
        if question_count == 0 {
            return Err(SequencerError::NoQuestions(block_id));
        }
        Ok(Self {
            meta,
            question_count,
            question_index: 0,
            answers: Vec::with_capacity(question_count),
            completed: false,
        })
    }

    pub fn meta(&self) -> QuizBlockMeta {
        self.meta
    }

    pub fn question_index(&self) -> usize {
        self.question_index
    }

    pub fn answers(&self) -> &[usize] {
        &self.answers
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn select(&mut self, option: usize) -> QuizStep {
        if self.completed {
            return QuizStep::Ignored;
        }
        self.answers.push(option);
        if self.question_index + 1 < self.question_count {
            self.question_index += 1;
            return QuizStep::NextQuestion(self.question_index);
        }
        self.completed = true;
        QuizStep::Completed
    }

    pub fn progress(&self) -> QuizProgress {
        QuizProgress {
            block_index: usize::from(self.meta.id - 1),
            question_current: self.question_index + 1,
            question_total: self.question_count,
            completed: self.completed,
        }
    }

    /// Emits the block's completion stage and returns the next block's path.
    pub fn continue_to_next(&self, ctx: &FunnelContext, query: &str) -> Result<String, SequencerError> {
        if !self.completed {
            return Err(SequencerError::NotCompleted);
        }
        Ok(ctx.complete_stage(self.meta.stage, self.meta.page_path, self.meta.next_path, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funnel::test_support::context;

    #[test]
    fn at_quiz_01_block_metadata_chain() {
        for (i, meta) in QUIZ_BLOCKS.iter().enumerate() {
            assert_eq!(FunnelStage::block_completed(meta.id), Some(meta.stage));
            assert_eq!(meta.next_path, format!("/block-{}", i + 2));
        }
        assert!(quiz_block_meta(6).is_none());
    }

    #[test]
    fn at_quiz_02_questions_advance_then_complete() {
        let mut quiz = QuizBlockSequencer::new(3, 3).unwrap();
        assert_eq!(quiz.select(1), QuizStep::NextQuestion(1));
        assert_eq!(quiz.select(0), QuizStep::NextQuestion(2));
        assert_eq!(quiz.progress().question_current, 3);
        assert!(!quiz.is_completed());
        assert_eq!(quiz.select(2), QuizStep::Completed);
        assert!(quiz.is_completed());
        assert_eq!(quiz.select(2), QuizStep::Ignored);
        assert_eq!(quiz.answers(), &[1, 0, 2]);
        assert_eq!(quiz.progress().block_index, 2);
    }

    #[test]
    fn at_quiz_03_continue_requires_completion() {
        let (ctx, sink) = context();
        let mut quiz = QuizBlockSequencer::new(5, 1).unwrap();
        assert_eq!(
            quiz.continue_to_next(&ctx, "?clickid=c1"),
            Err(SequencerError::NotCompleted)
        );
        assert!(sink.stages().is_empty());
        quiz.select(0);
        let next = quiz.continue_to_next(&ctx, "?clickid=c1").unwrap();
        assert_eq!(next, "/block-6?clickid=c1");
        assert_eq!(sink.stages(), vec![FunnelStage::Block5Completed]);
    }

    #[test]
    fn at_quiz_04_rejects_unknown_or_empty_blocks() {
        assert_eq!(
            QuizBlockSequencer::new(9, 3).unwrap_err(),
            SequencerError::UnknownBlock(9)
        );
        assert_eq!(
            QuizBlockSequencer::new(1, 0).unwrap_err(),
            SequencerError::NoQuestions(1)
        );
    }
}
