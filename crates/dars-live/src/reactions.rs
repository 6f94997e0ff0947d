use std::collections::BTreeMap;

use tokio::sync::watch;

use dars_types::models::{Reaction, RowId};

use crate::context::AppContext;
use crate::error::LiveError;
use crate::live_list::{ListSource, ListState, LiveList, Phase};
use crate::reconcile::ListPolicy;

/// Reaction stream of one webinar.
pub struct WebinarReactions {
    ctx: AppContext,
    webinar_id: RowId,
    list: LiveList<Reaction>,
}

impl WebinarReactions {
    pub fn open(ctx: &AppContext, webinar_id: RowId) -> Self {
        let source = ListSource::table(ListPolicy::append()).scoped("webinar_id", webinar_id);
        Self {
            ctx: ctx.clone(),
            webinar_id,
            list: LiveList::mount(ctx, source),
        }
    }

    pub fn webinar_id(&self) -> RowId {
        self.webinar_id
    }

    pub fn reactions(&self) -> Vec<Reaction> {
        self.list.items()
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        count_by_type(&self.list.items())
    }

    pub fn phase(&self) -> Phase {
        self.list.phase()
    }

    pub fn watch(&self) -> watch::Receiver<ListState<Reaction>> {
        self.list.watch()
    }

    pub async fn send(&self, reaction_type: &str) -> Result<Reaction, LiveError> {
        self.ctx
            .backend
            .send_reaction(self.webinar_id, reaction_type)
            .await
    }

    pub fn retry(&mut self) {
        self.list.retry();
    }
}

pub fn count_by_type(reactions: &[Reaction]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for reaction in reactions {
        *counts.entry(reaction.reaction_type.clone()).or_insert(0) += 1;
    }
    counts
}
